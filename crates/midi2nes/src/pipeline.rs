use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use dpcm_bank::{DrumMapper, SampleIndex};
use frame_compile::FrameCompiler;
use pattern_detect::{
    compress_patterns, detect_loops, detect_patterns, events_from_frames, PatternArchive,
};
use rom_emit::{famistudio_text, Mapper, Mmc1, MusicAssembly, Nrom, ProjectBuilder};
use tempo_map::TempoOptimizationStrategy;
use track_map::assign_tracks;

use crate::context::CompileContext;

#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    #[error(transparent)]
    Ingest(#[from] midi_ingest::IngestError),
    #[error(transparent)]
    Bank(#[from] dpcm_bank::BankError),
    #[error(transparent)]
    Pattern(#[from] pattern_detect::PatternError),
    #[error(transparent)]
    Emit(#[from] rom_emit::EmitError),
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CompileError {
    /// Toolchain trouble is reported distinctly from compilation errors.
    pub fn exit_code(&self) -> i32 {
        match self {
            CompileError::Emit(
                rom_emit::EmitError::Toolchain(_) | rom_emit::EmitError::ToolchainMissing { .. },
            ) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MapperChoice {
    Mmc1,
    Nrom,
}

impl MapperChoice {
    fn to_mapper(self) -> Box<dyn Mapper> {
        match self {
            MapperChoice::Mmc1 => Box::new(Mmc1),
            MapperChoice::Nrom => Box::new(Nrom),
        }
    }
}

/// One compile invocation: paths and output selection.
#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// Keep the assembler project here instead of a temp directory.
    pub project_dir: Option<PathBuf>,
    /// Stop after writing the project; never invoke the toolchain.
    pub prepare_only: bool,
    /// Also write the pattern archive as JSON.
    pub patterns_out: Option<PathBuf>,
    /// Also write a FamiStudio/FamiTracker text export.
    pub famistudio_out: Option<PathBuf>,
    /// Also write an NSF rendition of the four register channels.
    pub nsf_out: Option<PathBuf>,
    pub mapper: MapperChoice,
}

impl CompileRequest {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            project_dir: None,
            prepare_only: false,
            patterns_out: None,
            famistudio_out: None,
            nsf_out: None,
            mapper: MapperChoice::Mmc1,
        }
    }
}

/// What a successful compile produced.
#[derive(Debug, Clone)]
pub struct CompileOutcome {
    pub rom_path: Option<PathBuf>,
    pub project_dir: PathBuf,
    pub total_frames: usize,
    pub unique_patterns: usize,
    pub compression_ratio: f64,
    pub loop_count: usize,
}

/// Run the whole pipeline: ingest, map, compile frames, detect patterns
/// and loops, emit assembly, build the ROM.
pub fn compile(request: &CompileRequest, ctx: &mut CompileContext) -> Result<CompileOutcome> {
    // Ingest. Per-event recoveries are already counted by the parser.
    let mut parsed = midi_ingest::parse_midi(&request.input)?;
    ctx.diagnostics.invalid_tempo_changes += parsed.stats.invalid_tempo_changes;
    ctx.diagnostics.malformed_events += parsed.stats.malformed_events;
    info!(
        tracks = parsed.events.len(),
        notes = parsed.stats.note_events,
        "parsed MIDI"
    );

    if ctx.config.frame_align_tempo {
        parsed.tempo_map.optimize(TempoOptimizationStrategy::FrameAligned);
    }

    // Channel assignment, drums included.
    let index = match &ctx.config.dpcm_index {
        Some(path) => SampleIndex::load(path)?,
        None => SampleIndex::builtin_kit(),
    };
    let drums = DrumMapper::new(index, ctx.config.drums.clone())?;
    let (tracks, mapping) = assign_tracks(
        &parsed.events,
        &parsed.profiles,
        &drums,
        &mut ctx.samples,
        ctx.config.arpeggio_style,
    );
    ctx.diagnostics.dropped_note_events += mapping.dropped_events as u32;
    let bank = ctx.samples.stats();
    ctx.diagnostics.samples_evicted += bank.evictions;
    ctx.diagnostics.samples_aliased += bank.aliased;
    debug!(?mapping, "channel assignment done");

    // Frame expansion.
    let compiler = FrameCompiler::new(ctx.config.compiler);
    let (frames, stats) = compiler.compile(&tracks);
    ctx.diagnostics.pitch_out_of_range += stats.pitch_out_of_range;
    let total_frames = frames.max_frame().map(|f| f as usize + 1).unwrap_or(0);
    info!(
        total_frames,
        populated = frames.populated_len(),
        "frames compiled"
    );

    let report = frame_compile::validate_frames(&frames);
    for issue in &report.issues {
        warn!(%issue, "frame validation");
    }
    ctx.diagnostics.frame_validation_issues += report.issues.len() as u32;

    // Pattern detection and compression.
    let archive = if ctx.config.use_patterns {
        let events = events_from_frames(&frames);
        let detection = detect_patterns(&events, &ctx.config.detector);
        ctx.diagnostics.pattern_shard_timeouts += detection.timed_out_shards;
        let (patterns, references, pattern_stats) = compress_patterns(&events, &detection);
        info!(
            patterns = pattern_stats.unique_patterns,
            ratio = pattern_stats.compression_ratio,
            "patterns detected"
        );
        PatternArchive::new(patterns, references, pattern_stats)
    } else {
        PatternArchive::empty()
    };

    if let Some(path) = &request.patterns_out {
        archive.save(path)?;
    }

    // Loops over the pattern positions.
    let (loops, invalid_loops) = detect_loops(&archive.patterns, &parsed.tempo_map);
    ctx.diagnostics.invalid_loop_points += invalid_loops;

    if let Some(path) = &request.famistudio_out {
        std::fs::write(path, famistudio_text(&frames, 64)).map_err(|source| {
            CompileError::Io {
                path: path.display().to_string(),
                source,
            }
        })?;
    }

    if let Some(path) = &request.nsf_out {
        let song_name = request
            .input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "midi2nes".to_string());
        rom_emit::export_nsf(&frames, &rom_emit::NsfHeader::new(song_name), path)?;
    }

    // Emit and build.
    let mapper = request.mapper.to_mapper();
    let music_asm = MusicAssembly::new(&frames, &archive.patterns, &archive.references)
        .with_samples(ctx.samples.export_samples())
        .with_loops(&loops)
        .render(mapper.as_ref())?;

    // Held until the ROM is copied out; dropping it removes the directory.
    let _temp_project;
    let project_dir = match &request.project_dir {
        Some(dir) => dir.clone(),
        None => {
            let dir = tempfile::tempdir().map_err(|source| CompileError::Io {
                path: "temp project dir".to_string(),
                source,
            })?;
            let path = dir.path().join("nes_project");
            _temp_project = dir;
            path
        }
    };
    let builder = ProjectBuilder::new(&project_dir).with_mapper(mapper);
    builder.prepare(&music_asm)?;

    let rom_path = if request.prepare_only {
        None
    } else {
        let built = builder.build()?;
        std::fs::copy(&built, &request.output).map_err(|source| CompileError::Io {
            path: request.output.display().to_string(),
            source,
        })?;
        Some(request.output.clone())
    };

    Ok(CompileOutcome {
        rom_path,
        project_dir,
        total_frames,
        unique_patterns: archive.stats.unique_patterns,
        compression_ratio: archive.stats.compression_ratio,
        loop_count: loops.len(),
    })
}
