use thiserror::Error;
use tonic::Status;

#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("gRPC error: {0}")]
    GrpcError(#[from] Status),

    #[error("Transport error: {0}")]
    TransportError(#[from] tonic::transport::Error),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Timeout error")]
    TimeoutError,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_error_kind() {
        let conn = NetworkError::ConnectionError("boom".to_string());
        assert!(conn.to_string().contains("Connection error"));

        assert_eq!(NetworkError::TimeoutError.to_string(), "Timeout error");
    }

    #[test]
    fn from_tonic_status_maps_to_grpc_error() {
        let err: NetworkError = Status::unavailable("peer down").into();
        match err {
            NetworkError::GrpcError(status) => assert!(status.message().contains("peer down")),
            other => panic!("expected GrpcError, got {other:?}"),
        }
    }
}
