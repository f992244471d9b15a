pub mod asm;
pub mod famistudio;
pub mod ines;
pub mod mapper;
pub mod nsf;
pub mod project;
pub mod runtime;

pub use asm::MusicAssembly;
pub use famistudio::famistudio_text;
pub use ines::{validate_rom, RomHeader};
pub use mapper::{Mapper, Mmc1, Nrom};
pub use nsf::{export_nsf, NsfHeader};
pub use project::ProjectBuilder;

/// Errors from assembly emission and project building.
#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    #[error("music tables need {needed} bytes but the {mapper} layout only fits {capacity}")]
    TableSizeExceedsBank {
        needed: usize,
        capacity: usize,
        mapper: &'static str,
    },
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("assembler toolchain failed: {0}")]
    Toolchain(String),
    #[error("{tool} not found on PATH")]
    ToolchainMissing { tool: &'static str },
}

pub type Result<T> = std::result::Result<T, EmitError>;
