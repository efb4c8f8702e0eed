use thiserror::Error;

/// Top-level error type for the Tradewind core.
#[derive(Error, Debug)]
pub enum TwError {
    #[error("Market data error: {0}")]
    Data(#[from] MarketDataError),

    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("State store error: {0}")]
    Store(#[from] StoreError),

    #[error("Indicator error: {0}")]
    Indicator(#[from] IndicatorError),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised by a market-data source implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarketDataError {
    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("no data for {symbol} in range {start} to {end}")]
    NoDataInRange {
        symbol: String,
        start: String,
        end: String,
    },

    #[error("market data fetch timed out after {seconds} s")]
    Timeout { seconds: u64 },

    #[error("malformed market data: {message}")]
    Malformed { message: String },

    #[error("upstream data provider error: {message}")]
    Upstream { message: String, transient: bool },
}

impl MarketDataError {
    /// Whether the failure is worth retrying on the next tick.
    pub fn is_transient(&self) -> bool {
        match self {
            MarketDataError::Timeout { .. } => true,
            MarketDataError::Upstream { transient, .. } => *transient,
            _ => false,
        }
    }
}

/// Errors surfaced by broker operations.
///
/// Transient failures (timeouts, rate limits, 5xx) are retried by the
/// executor with back-off; terminal failures (4xx, rejections) are not.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("not connected to broker")]
    NotConnected,

    #[error("order rejected by broker: {reason}")]
    OrderRejected { reason: String },

    #[error("order not found: {order_id}")]
    OrderNotFound { order_id: String },

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: String, available: String },

    #[error("authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("rate limited, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("broker call timed out after {seconds} s")]
    Timeout { seconds: u64 },

    #[error("broker unavailable: {message}")]
    Unavailable { message: String },
}

impl BrokerError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BrokerError::RateLimited { .. }
                | BrokerError::Timeout { .. }
                | BrokerError::Unavailable { .. }
        )
    }
}

/// Errors from the state store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("write conflict: {message}")]
    Conflict { message: String },

    #[error("store write timed out after {seconds} s")]
    Timeout { seconds: u64 },

    #[error("store backend error: {message}")]
    Backend { message: String },
}

/// Errors from the indicator library.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IndicatorError {
    #[error("insufficient data: need {required} bars, got {got}")]
    InsufficientData { required: usize, got: usize },

    #[error("bad indicator parameter {name}: {message}")]
    BadParameter { name: String, message: String },
}

/// Result alias for Tradewind operations.
pub type TwResult<T> = Result<T, TwError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification_broker() {
        assert!(BrokerError::RateLimited { retry_after_ms: 500 }.is_transient());
        assert!(BrokerError::Timeout { seconds: 15 }.is_transient());
        assert!(BrokerError::Unavailable {
            message: "502".into()
        }
        .is_transient());

        assert!(!BrokerError::OrderRejected {
            reason: "unknown symbol".into()
        }
        .is_transient());
        assert!(!BrokerError::InsufficientFunds {
            required: "2000".into(),
            available: "100".into()
        }
        .is_transient());
    }

    #[test]
    fn test_transient_classification_data() {
        assert!(MarketDataError::Timeout { seconds: 10 }.is_transient());
        assert!(MarketDataError::Upstream {
            message: "503".into(),
            transient: true
        }
        .is_transient());
        assert!(!MarketDataError::SymbolNotFound {
            symbol: "ZZZZ".into()
        }
        .is_transient());
    }

    #[test]
    fn test_error_conversion() {
        let err: TwError = IndicatorError::InsufficientData {
            required: 20,
            got: 5,
        }
        .into();
        match err {
            TwError::Indicator(IndicatorError::InsufficientData { required, got }) => {
                assert_eq!(required, 20);
                assert_eq!(got, 5);
            }
            other => panic!("expected Indicator error, got {other:?}"),
        }
    }

    #[test]
    fn test_error_display() {
        let err = StoreError::NotFound {
            entity: "LiveStrategy",
            id: "abc".into(),
        };
        assert!(err.to_string().contains("LiveStrategy"));
        assert!(err.to_string().contains("abc"));
    }
}
