use std::time::Instant;

use crate::LOG;

/// Logs every request and its outcome to the application logger
#[derive(Debug, Default, Clone)]
pub struct LogMiddleware {
    _priv: (),
}

impl LogMiddleware {
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

#[tide::utils::async_trait]
impl<State: Clone + Send + Sync + 'static> tide::Middleware<State> for LogMiddleware {
    async fn handle(&self, req: tide::Request<State>, next: tide::Next<'_, State>) -> tide::Result {
        let path = req.url().path().to_string();
        let method = req.method().to_string();
        let start = Instant::now();
        let resp = next.run(req).await;
        let status: u16 = resp.status().into();
        let elapsed_ms = start.elapsed().as_millis() as u64;
        if let Some(err) = resp.error() {
            slog::error!(
                LOG, "request failed";
                "method" => method, "path" => path, "status" => status,
                "elapsed_ms" => elapsed_ms, "error" => err.to_string(),
            );
        } else if status >= 400 {
            slog::warn!(
                LOG, "request";
                "method" => method, "path" => path, "status" => status, "elapsed_ms" => elapsed_ms,
            );
        } else {
            slog::info!(
                LOG, "request";
                "method" => method, "path" => path, "status" => status, "elapsed_ms" => elapsed_ms,
            );
        }
        Ok(resp)
    }
}
