//! Error types and handling for the training engine.
//!
//! All failures in this crate are synchronous and fatal to the current
//! operation: they reflect programmer or model-definition errors, not
//! transient runtime conditions. A failed graph construction leaves the
//! graph in an unspecified partial state and the whole object should be
//! discarded.

use thiserror::Error;

/// The main error type for the edgenn library.
#[derive(Error, Debug)]
pub enum EdgennError {
    /// Invalid argument or malformed model definition
    #[error("Invalid parameter: {message}")]
    InvalidParameter {
        /// What was invalid
        message: String,
    },

    /// A requested combination of features is not supported
    #[error("Not supported: {message}")]
    NotSupported {
        /// The unsupported combination
        message: String,
    },

    /// A referenced layer name did not resolve to any node
    #[error("Layer not found: {name}")]
    LayerNotFound {
        /// The unresolved layer name
        name: String,
    },

    /// Malformed graph structure detected after construction
    #[error("Graph error: {message}")]
    Graph {
        /// What is malformed
        message: String,
    },

    /// Network or optimizer configuration errors
    #[error("Configuration error: {message}")]
    Configuration {
        /// The offending configuration
        message: String,
    },

    /// Dimension mismatch between tensors or layer ports
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The dimension the operation required
        expected: String,
        /// The dimension it received
        actual: String,
    },

    /// Shape errors from ndarray
    #[error("Shape error: {source}")]
    Shape {
        #[from]
        source: ndarray::ShapeError,
    },

    /// Numerical computation errors
    #[error("Numerical error: {message}")]
    Numerical { message: String },
}

/// Result type alias for the edgenn library.
pub type Result<T> = std::result::Result<T, EdgennError>;

impl EdgennError {
    /// Create a new invalid parameter error
    pub fn invalid_parameter<S: Into<String>>(message: S) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Create a new not-supported error
    pub fn not_supported<S: Into<String>>(message: S) -> Self {
        Self::NotSupported {
            message: message.into(),
        }
    }

    /// Create a new layer-not-found error
    pub fn layer_not_found<S: Into<String>>(name: S) -> Self {
        Self::LayerNotFound { name: name.into() }
    }

    /// Create a new graph structure error
    pub fn graph<S: Into<String>>(message: S) -> Self {
        Self::Graph {
            message: message.into(),
        }
    }

    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new dimension mismatch error
    pub fn dimension_mismatch<S: Into<String>>(expected: S, actual: S) -> Self {
        Self::DimensionMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a new numerical error
    pub fn numerical<S: Into<String>>(message: S) -> Self {
        Self::Numerical {
            message: message.into(),
        }
    }

    /// Get the error category
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidParameter { .. } => "InvalidParameter",
            Self::NotSupported { .. } => "NotSupported",
            Self::LayerNotFound { .. } => "LayerNotFound",
            Self::Graph { .. } => "Graph",
            Self::Configuration { .. } => "Configuration",
            Self::DimensionMismatch { .. } => "DimensionMismatch",
            Self::Shape { .. } => "Shape",
            Self::Numerical { .. } => "Numerical",
        }
    }
}
