use async_trait::async_trait;
use reqwest::{Request, Response};

/// Executes prepared HTTP requests; lets downloads run against any transport.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
