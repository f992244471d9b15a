use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use dpcm_bank::{DrumMapper, SampleIndex, SampleManager};
use frame_compile::FrameCompiler;
use track_map::assign_tracks;

use crate::context::CompileConfig;
use crate::pipeline::CompileError;

/// PRG bank capacity available for one song's tables.
const BANK_CAPACITY: usize = 16 * 1024;
/// Banks 0..=6 hold music data; the fixed bank carries code and vectors.
const DATA_BANKS: usize = 7;

/// Per-frame table bytes: four tonal tables on three channels, the noise
/// and DPCM tables, and the three-byte pattern reference entry.
const BYTES_PER_FRAME: usize = 3 * 4 + 2 + 3;

#[derive(Debug, thiserror::Error)]
pub enum SongBankError {
    #[error("song '{0}' already exists in the bank")]
    DuplicateSong(String),
    #[error("song '{0}' not found in the bank")]
    UnknownSong(String),
    #[error("no PRG bank has room for '{name}' ({bytes} bytes)")]
    BankFull { name: String, bytes: usize },
    #[error("failed to read song bank {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid song bank {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Compile(#[from] Box<CompileError>),
}

pub type Result<T> = std::result::Result<T, SongBankError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SongMetadata {
    pub composer: Option<String>,
    pub loop_point: Option<u32>,
    pub tags: Vec<String>,
    pub tempo_base: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongEntry {
    pub metadata: SongMetadata,
    /// PRG bank label, `bank_0` … `bank_6`.
    pub bank: String,
    pub source: PathBuf,
    pub total_frames: usize,
    pub data_bytes: usize,
}

/// A multi-song collection packed into the cartridge's PRG banks.
///
/// Adding a song compiles it far enough to measure its table footprint,
/// then first-fit packs it into the data banks. The collection
/// round-trips as JSON so it can grow across invocations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SongBank {
    pub songs: BTreeMap<String, SongEntry>,
}

impl SongBank {
    pub fn new() -> Self {
        Self::default()
    }

    fn bank_usage(&self) -> [usize; DATA_BANKS] {
        let mut usage = [0usize; DATA_BANKS];
        for entry in self.songs.values() {
            if let Some(index) = entry
                .bank
                .strip_prefix("bank_")
                .and_then(|n| n.parse::<usize>().ok())
            {
                if index < DATA_BANKS {
                    usage[index] += entry.data_bytes;
                }
            }
        }
        usage
    }

    fn assign_bank(&self, name: &str, bytes: usize) -> Result<String> {
        let usage = self.bank_usage();
        for (index, used) in usage.iter().enumerate() {
            if used + bytes <= BANK_CAPACITY {
                return Ok(format!("bank_{index}"));
            }
        }
        Err(SongBankError::BankFull {
            name: name.to_string(),
            bytes,
        })
    }

    /// Compile a MIDI file just far enough to size it, then register it.
    pub fn add_song_from_midi(
        &mut self,
        midi_path: impl AsRef<Path>,
        name: &str,
        metadata: SongMetadata,
        config: &CompileConfig,
    ) -> Result<&SongEntry> {
        if self.songs.contains_key(name) {
            return Err(SongBankError::DuplicateSong(name.to_string()));
        }

        let parsed = midi_ingest::parse_midi(midi_path.as_ref())
            .map_err(|e| Box::new(CompileError::Ingest(e)))?;

        let index = match &config.dpcm_index {
            Some(path) => {
                SampleIndex::load(path).map_err(|e| Box::new(CompileError::Bank(e)))?
            }
            None => SampleIndex::builtin_kit(),
        };
        let drums = DrumMapper::new(index, config.drums.clone())
            .map_err(|e| Box::new(CompileError::Bank(e)))?;
        let mut samples = SampleManager::new(config.drums.sample_bank);

        let (tracks, _) = assign_tracks(
            &parsed.events,
            &parsed.profiles,
            &drums,
            &mut samples,
            config.arpeggio_style,
        );
        let (frames, _) = FrameCompiler::new(config.compiler).compile(&tracks);

        let total_frames = frames.max_frame().map(|f| f as usize + 1).unwrap_or(0);
        let data_bytes = total_frames * BYTES_PER_FRAME;
        let bank = self.assign_bank(name, data_bytes)?;

        info!(song = name, bank = %bank, data_bytes, "song added to bank");
        let entry = SongEntry {
            metadata,
            bank,
            source: midi_path.as_ref().to_path_buf(),
            total_frames,
            data_bytes,
        };
        self.songs.insert(name.to_string(), entry);
        Ok(&self.songs[name])
    }

    pub fn remove_song(&mut self, name: &str) -> Result<SongEntry> {
        self.songs
            .remove(name)
            .ok_or_else(|| SongBankError::UnknownSong(name.to_string()))
    }

    pub fn export_bank(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self).expect("bank serializes");
        std::fs::write(path, text).map_err(|source| SongBankError::Io {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn import_bank(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| SongBankError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SongBankError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}
