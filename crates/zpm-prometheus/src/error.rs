use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("encoded metrics are not UTF-8: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}
