use thiserror::Error;

#[derive(Debug, Error)]
pub enum NNError {
    // Construction errors
    #[error("Invalid layer configuration: {0}")]
    InvalidLayerConfiguration(String),
    #[error("Layer shape mismatch: {0}")]
    LayerShapeMismatch(String),
    #[error("Network has no trainable layers")]
    EmptyModel,

    // Call-time shape errors
    #[error("Invalid input shape: {0}")]
    InvalidInputShape(String),
    #[error("Invalid output shape: {0}")]
    InvalidOutputShape(String),
    #[error("Inputs and labels should be of the same size ({inputs} inputs, {labels} labels)")]
    LengthMismatch { inputs: usize, labels: usize },
    #[error("Label {label} does not fit an output layer of {units} units")]
    InvalidLabel { label: usize, units: usize },
    #[error("Backprop called without a matching feedforward: {0}")]
    MissingForwardPass(String),

    // Numerical errors
    #[error("Computation error: {0}")]
    ComputationError(String),

    // Dataset errors
    #[error("Bad magic number: expected {expected:#010x}, found {found:#010x}")]
    BadMagicNumber { expected: u32, found: u32 },
    #[error("Malformed dataset: {0}")]
    MalformedDataset(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Training worker {0} panicked")]
    WorkerPanicked(usize),

    #[error("Plot error: {0}")]
    PlotError(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Shape error: {0}")]
    ShapeError(#[from] ndarray::ShapeError),
}

pub type Result<T> = std::result::Result<T, NNError>;
