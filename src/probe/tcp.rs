use crate::error::ProbeError;
use tokio::net::TcpStream;

/// Port-open check: a connect that succeeds is enough, the stream is dropped at once.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpProber;

impl TcpProber {
    pub async fn check(&self, host: &str, port: u16) -> Result<(), ProbeError> {
        match TcpStream::connect((host, port)).await {
            Ok(stream) => {
                drop(stream);
                Ok(())
            }
            Err(err) => Err(ProbeError::tcp(endpoint(host, port), err.to_string())),
        }
    }
}

fn endpoint(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}
