//! Downloads of the raw death exports.

mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use anyhow::{Context, Result, anyhow, bail};
use bytes::Bytes;
use flate2::read::GzDecoder;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::info;

/// GETs `url` and returns the body, failing on any non-success status.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Bytes> {
    let req = reqwest::Request::new(reqwest::Method::GET, url.parse()?);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        bail!("download of {url} failed with status {status}: {body}");
    }
    Ok(resp.bytes().await?)
}

/// Local file name for `url`: its last path segment with spaces replaced.
pub fn file_name_for(url: &str) -> Result<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .map(|name| name.replace(' ', "_"))
        .ok_or_else(|| anyhow!("cannot derive a file name from '{url}'"))
}

/// Saves `url` into `dest_dir` and returns the saved path.
///
/// Gzip payloads are also decompressed next to the download and zip
/// archives are extracted into `dest_dir`.
#[tracing::instrument(skip(client, dest_dir), fields(dest_dir = %dest_dir.display()))]
pub async fn download<C: HttpClient>(client: &C, url: &str, dest_dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("cannot create {}", dest_dir.display()))?;
    let path = dest_dir.join(file_name_for(url)?);

    let fetch_start = std::time::Instant::now();
    let bytes = fetch_bytes(client, url).await?;
    std::fs::write(&path, &bytes).with_context(|| format!("cannot write {}", path.display()))?;
    info!(
        bytes = bytes.len(),
        elapsed_secs = fetch_start.elapsed().as_secs(),
        path = %path.display(),
        "Download saved"
    );

    match path.extension().and_then(|e| e.to_str()) {
        Some("gz") => {
            let unpacked = gunzip(&path)?;
            info!(path = %unpacked.display(), "Archive decompressed");
        }
        Some("zip") => {
            let files = unzip(&path, dest_dir)?;
            info!(files, dest_dir = %dest_dir.display(), "Archive extracted");
        }
        _ => {}
    }
    Ok(path)
}

/// Decompresses `name.ext.gz` into `name.ext` in the same directory.
pub fn gunzip(path: &Path) -> Result<PathBuf> {
    let target = path.with_extension("");
    let mut decoder = GzDecoder::new(File::open(path)?);
    let mut out =
        File::create(&target).with_context(|| format!("cannot create {}", target.display()))?;
    std::io::copy(&mut decoder, &mut out)
        .with_context(|| format!("cannot decompress {}", path.display()))?;
    Ok(target)
}

/// Extracts every entry of the zip archive at `path` into `dest_dir` and
/// returns the number of entries.
pub fn unzip(path: &Path, dest_dir: &Path) -> Result<usize> {
    let file = File::open(path).with_context(|| format!("cannot open {}", path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("{} is not a zip archive", path.display()))?;
    std::fs::create_dir_all(dest_dir)
        .with_context(|| format!("cannot create {}", dest_dir.display()))?;
    archive
        .extract(dest_dir)
        .with_context(|| format!("cannot extract {}", path.display()))?;
    Ok(archive.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::env;
    use std::fs;
    use std::io::Write;

    struct StatusClient(u16);

    #[async_trait::async_trait]
    impl HttpClient for StatusClient {
        async fn execute(&self, _req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
            let resp = http::Response::builder()
                .status(self.0)
                .body("no such export")
                .unwrap();
            Ok(reqwest::Response::from(resp))
        }
    }

    #[test]
    fn test_file_name_for_url() {
        assert_eq!(
            file_name_for("https://epistat.sciensano.be/Data/COVID19BE_MORT.csv").unwrap(),
            "COVID19BE_MORT.csv"
        );
        assert_eq!(
            file_name_for("https://example.org/open data/deaths 2020.zip?v=2").unwrap(),
            "deaths_2020.zip"
        );
        assert!(file_name_for("https://example.org/").is_err());
    }

    #[test]
    fn test_gunzip_next_to_archive() {
        let dir = env::temp_dir().join("excess_deaths_test_gunzip");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let archive = dir.join("deaths.csv.gz");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"Date,Year,Deaths\n2020-01-01,2020,3\n").unwrap();
        fs::write(&archive, encoder.finish().unwrap()).unwrap();

        let unpacked = gunzip(&archive).unwrap();
        assert_eq!(unpacked, dir.join("deaths.csv"));
        assert!(fs::read_to_string(&unpacked).unwrap().contains("2020-01-01"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_unzip_into_dest_dir() {
        let dir = env::temp_dir().join("excess_deaths_test_unzip");
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();

        let archive = dir.join("DEMO_DEATH_OPEN.zip");
        let mut writer = zip::ZipWriter::new(fs::File::create(&archive).unwrap());
        writer
            .start_file("DEMO_DEATH_OPEN.txt", zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(b"DT_DATE;MS_NUM_DEATH\n01/01/2019;3\n").unwrap();
        writer.finish().unwrap();

        let out = dir.join("extracted");
        assert_eq!(unzip(&archive, &out).unwrap(), 1);
        let content = fs::read_to_string(out.join("DEMO_DEATH_OPEN.txt")).unwrap();
        assert!(content.contains("01/01/2019;3"));

        assert!(unzip(&out.join("DEMO_DEATH_OPEN.txt"), &out).is_err());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn test_fetch_bytes_fails_on_error_status() {
        let err = fetch_bytes(&StatusClient(404), "https://example.org/missing.csv")
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("404"));
        assert!(message.contains("no such export"));

        let body = fetch_bytes(&StatusClient(200), "https://example.org/ok.csv")
            .await
            .unwrap();
        assert_eq!(&body[..], b"no such export");
    }
}
