use serde::{Deserialize, Serialize};

/// A pattern body record as it goes into the emitted dictionary. DPCM
/// patterns carry a sample id; tonal patterns do not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternEvent {
    pub note: u8,
    pub volume: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_id: Option<u8>,
}

impl PatternEvent {
    pub fn new(note: u8, volume: u8) -> Self {
        Self {
            note,
            volume,
            sample_id: None,
        }
    }
}

/// Per-field signed difference between consecutive delta-run records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDelta {
    pub note: i16,
    pub volume: i16,
    pub sample_id: i16,
}

/// One block of a record-compressed pattern body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecordBlock {
    Raw {
        event: PatternEvent,
    },
    Rle {
        data: PatternEvent,
        count: usize,
    },
    Delta {
        start: PatternEvent,
        deltas: Vec<RecordDelta>,
    },
}

const MIN_RLE_LEN: usize = 2;
const MIN_DELTA_LEN: usize = 3;

fn rle_run(records: &[PatternEvent], start: usize) -> usize {
    let base = records[start];
    records[start..].iter().take_while(|&&r| r == base).count()
}

/// Records can join one delta run when both have the same sample-id
/// presence and at least one numeric field actually changes.
fn can_delta(prev: &PatternEvent, cur: &PatternEvent) -> bool {
    prev.sample_id.is_some() == cur.sample_id.is_some() && prev != cur
}

fn delta_run(records: &[PatternEvent], start: usize) -> usize {
    let mut count = 1;
    let mut prev = &records[start];
    for cur in &records[start + 1..] {
        if can_delta(prev, cur) {
            count += 1;
            prev = cur;
        } else {
            break;
        }
    }
    count
}

fn diff(prev: &PatternEvent, cur: &PatternEvent) -> RecordDelta {
    RecordDelta {
        note: cur.note as i16 - prev.note as i16,
        volume: cur.volume as i16 - prev.volume as i16,
        sample_id: match (prev.sample_id, cur.sample_id) {
            (Some(a), Some(b)) => b as i16 - a as i16,
            _ => 0,
        },
    }
}

/// RLE + delta compression over a pattern body. Runs of identical records
/// collapse to one RLE block; monotone-ish runs collapse to a start record
/// plus signed per-field deltas; everything else stays raw.
pub fn compress_records(records: &[PatternEvent]) -> Vec<RecordBlock> {
    let mut blocks = Vec::new();
    let mut i = 0;

    while i < records.len() {
        let rle = rle_run(records, i);
        if rle >= MIN_RLE_LEN {
            blocks.push(RecordBlock::Rle {
                data: records[i],
                count: rle,
            });
            i += rle;
            continue;
        }

        let delta = delta_run(records, i);
        if delta >= MIN_DELTA_LEN {
            let deltas = records[i..i + delta]
                .windows(2)
                .map(|pair| diff(&pair[0], &pair[1]))
                .collect();
            blocks.push(RecordBlock::Delta {
                start: records[i],
                deltas,
            });
            i += delta;
            continue;
        }

        blocks.push(RecordBlock::Raw { event: records[i] });
        i += 1;
    }

    blocks
}

/// Exact inverse of [`compress_records`].
pub fn decompress_records(blocks: &[RecordBlock]) -> Vec<PatternEvent> {
    let mut records = Vec::new();
    for block in blocks {
        match block {
            RecordBlock::Raw { event } => records.push(*event),
            RecordBlock::Rle { data, count } => {
                records.extend(std::iter::repeat(*data).take(*count));
            }
            RecordBlock::Delta { start, deltas } => {
                let mut current = *start;
                records.push(current);
                for d in deltas {
                    current.note = (current.note as i16 + d.note) as u8;
                    current.volume = (current.volume as i16 + d.volume) as u8;
                    if let Some(id) = current.sample_id {
                        current.sample_id = Some((id as i16 + d.sample_id) as u8);
                    }
                    records.push(current);
                }
            }
        }
    }
    records
}
