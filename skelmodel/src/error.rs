use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to parse IQM file '{file}': {message}")]
    IqmParse { file: String, message: String },

    #[error("unsupported IQM version {version} in '{file}'")]
    IqmVersion { file: String, version: u32 },

    #[error("IQM file '{file}' is too large ({size} bytes)")]
    IqmFileTooLarge { file: String, size: u32 },

    #[error("failed to parse MD5 file '{file}': {message}")]
    Md5Parse { file: String, message: String },

    #[error("unsupported MD5 version {version} in '{file}'")]
    Md5Version { file: String, version: i32 },

    #[error("failed to parse SMD file '{file}': {message}")]
    SmdParse { file: String, message: String },

    #[error("unsupported SMD version {version} in '{file}'")]
    SmdVersion { file: String, version: i32 },

    #[error("bone count mismatch in '{file}': expected {expected}, found {found}")]
    BoneCountMismatch {
        file: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown bone '{bone}' ({context})")]
    UnknownBone { bone: String, context: String },

    #[error("unknown animation: {name}")]
    UnknownAnimation { name: String },

    #[error("unknown tag: {name}")]
    UnknownTag { name: String },

    #[error("cannot load model '{requested}' while '{loading}' is still loading")]
    NestedLoad { requested: String, loading: String },

    #[error("{command}: not loading a model")]
    NotLoading { command: String },

    #[error("too many animation parts for part {part}")]
    TooManyAnimParts { part: usize },

    #[error("could not load model: {name}")]
    ModelNotFound { name: String },

    #[error("asset not found: {path}")]
    AssetMissing { path: String },

    #[cfg(feature = "json")]
    #[error("failed to parse model configuration '{file}': {message}")]
    ConfigParse { file: String, message: String },
}
