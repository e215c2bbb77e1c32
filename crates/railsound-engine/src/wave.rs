//! WAV loading and segmentation.
//!
//! Parses the RIFF layout the train fleet's sound packs actually ship
//! (optional `JUNK` chunks, padded or oversized `fmt ` chunks, trailing
//! `cue ` and `LIST`/`labl` marker chunks) and splits the PCM payload into
//! up to three contiguous segments (start, loop, stop) at the byte offsets
//! named by the `"loop"` and `"stop"` labels.
//!
//! Parsing is pure: one in-memory pass, no I/O, no device calls. A track
//! calls [`parse`] once at load time and never again.

use crate::error::LoadError;

/// Number of segment slots a payload can be split into (start, loop, stop).
pub const SEGMENT_SLOTS: usize = 3;

/// Label names that participate in segmentation; anything else is parsed
/// but ignored.
const SEGMENT_LABELS: [&str; 2] = ["loop", "stop"];

/// Size of the fmt chunk record (id + size + 16 format bytes), used when
/// sizing the trailing marker region.
const FMT_STRUCT_LEN: u64 = 24;

const CUE_HEAD_LEN: usize = 12;
const CUE_RECORD_LEN: usize = 24;

/// Sample layout of a track. Only these four layouts are playable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaveFormat {
    Mono8,
    Mono16,
    Stereo8,
    Stereo16,
}

impl WaveFormat {
    /// Resolve from the fmt chunk fields; anything outside {8,16} bits ×
    /// {1,2} channels is unplayable.
    pub fn resolve(bits_per_sample: u16, channels: u16) -> Option<Self> {
        match (bits_per_sample, channels) {
            (8, 1) => Some(WaveFormat::Mono8),
            (8, 2) => Some(WaveFormat::Stereo8),
            (16, 1) => Some(WaveFormat::Mono16),
            (16, 2) => Some(WaveFormat::Stereo16),
            _ => None,
        }
    }

    pub fn channels(self) -> usize {
        match self {
            WaveFormat::Mono8 | WaveFormat::Mono16 => 1,
            WaveFormat::Stereo8 | WaveFormat::Stereo16 => 2,
        }
    }

    /// Bytes per single sample value.
    pub fn sample_bytes(self) -> usize {
        match self {
            WaveFormat::Mono8 | WaveFormat::Stereo8 => 1,
            WaveFormat::Mono16 | WaveFormat::Stereo16 => 2,
        }
    }

    /// Bytes per sample frame (all channels).
    pub fn frame_bytes(self) -> usize {
        self.channels() * self.sample_bytes()
    }
}

/// The 16 format bytes of the `fmt ` chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FormatChunk {
    pub audio_format: u16,
    pub channels: u16,
    pub sample_rate: u32,
    pub byte_rate: u32,
    pub block_align: u16,
    pub bits_per_sample: u16,
}

/// One record of the `cue ` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CuePoint {
    pub id: i32,
    pub position: u32,
    pub chunk_start: u32,
    pub block_start: u32,
    pub sample_offset: u32,
}

/// A named marker resolved to a byte offset into the PCM payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub name: String,
    pub byte_offset: u64,
}

/// The payload split into ordered segment slots. Unused trailing slots are
/// empty and are skipped at upload time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentSet {
    slots: [Vec<u8>; SEGMENT_SLOTS],
}

impl SegmentSet {
    pub fn bytes(&self, slot: usize) -> &[u8] {
        &self.slots[slot]
    }

    pub fn len(&self, slot: usize) -> usize {
        self.slots[slot].len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(|s| s.is_empty())
    }

    pub fn total_len(&self) -> usize {
        self.slots.iter().map(Vec::len).sum()
    }

    /// Non-empty slots in queue order.
    pub fn non_empty(&self) -> impl Iterator<Item = &[u8]> {
        self.slots
            .iter()
            .filter(|s| !s.is_empty())
            .map(Vec::as_slice)
    }

    pub fn non_empty_count(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_empty()).count()
    }
}

/// Everything a track needs from one parse pass.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedWave {
    pub format: WaveFormat,
    pub fmt: FormatChunk,
    pub data_len: u32,
    pub file_len: u64,
    pub segments: SegmentSet,
    /// Whether a `loop`/`stop` label actually split the payload. Selects the
    /// labeled stop/loop playback behavior.
    pub labeled: bool,
    pub labels: Vec<Label>,
    pub cues: Vec<CuePoint>,
}

/// Byte cursor over the in-memory file. Short reads yield zeros rather than
/// erroring; the caller-visible failure modes are the header checks and the
/// final format resolution.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> &'a [u8] {
        let n = n.min(self.remaining());
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        out
    }

    fn skip(&mut self, n: usize) {
        self.pos = (self.pos + n).min(self.data.len());
    }

    fn byte(&mut self) -> u8 {
        let out = self.take(1);
        out.first().copied().unwrap_or(0)
    }

    fn tag(&mut self) -> [u8; 4] {
        let mut out = [0u8; 4];
        let got = self.take(4);
        out[..got.len()].copy_from_slice(got);
        out
    }

    fn u16_le(&mut self) -> u16 {
        let mut raw = [0u8; 2];
        let got = self.take(2);
        raw[..got.len()].copy_from_slice(got);
        u16::from_le_bytes(raw)
    }

    fn u32_le(&mut self) -> u32 {
        let mut raw = [0u8; 4];
        let got = self.take(4);
        raw[..got.len()].copy_from_slice(got);
        u32::from_le_bytes(raw)
    }
}

/// Parse a complete WAV file image.
///
/// Tolerates a `JUNK` chunk ahead of `fmt `, unknown chunks before `fmt `,
/// and zero padding between `fmt ` and `data`. Missing `cue `/`labl`
/// metadata is not an error; the whole payload then lands in slot 0.
pub fn parse(bytes: &[u8]) -> Result<ParsedWave, LoadError> {
    let mut r = Reader::new(bytes);

    if r.tag() != *b"RIFF" {
        return Err(LoadError::NotRiffFile);
    }
    let _riff_len = r.u32_le();
    if r.tag() != *b"WAVE" {
        return Err(LoadError::NotWaveFile);
    }

    let mut window = r.tag();
    if window == *b"JUNK" {
        let junk_len = r.u32_le() as usize;
        r.skip(junk_len);
        window = r.tag();
    }

    // Stride-4 scan for `fmt `; on a match, read the format fields and
    // expect the data header next. A non-`data` header resumes the scan.
    let mut fmt = FormatChunk::default();
    let mut payload: &[u8] = &[];
    let mut data_len = 0u32;

    loop {
        if window == *b"fmt " {
            fmt = read_format_chunk(&mut r);
            if let Some(len) = read_data_header(&mut r) {
                data_len = len;
                payload = r.take(len as usize);
                break;
            }
        }
        if r.remaining() == 0 {
            break;
        }
        window = r.tag();
    }

    // Trailing marker region: file length minus payload minus the fmt
    // record, clamped to what actually remains.
    let extra_count = (bytes.len() as u64)
        .saturating_sub(u64::from(data_len))
        .saturating_sub(FMT_STRUCT_LEN) as usize;
    let extra = r.take(extra_count);

    let cues = parse_cues(extra);
    let labels = parse_labels(extra, &cues, fmt.block_align);
    let (segments, labeled) = split_segments(payload, &labels);

    let format = WaveFormat::resolve(fmt.bits_per_sample, fmt.channels)
        .ok_or(LoadError::UnknownAudioFormat)?;

    Ok(ParsedWave {
        format,
        fmt,
        data_len,
        file_len: bytes.len() as u64,
        segments,
        labeled,
        labels,
        cues,
    })
}

/// Read the chunk length and 16 format bytes following a matched `fmt ` id.
fn read_format_chunk(r: &mut Reader) -> FormatChunk {
    let _chunk_len = r.u32_le();
    FormatChunk {
        audio_format: r.u16_le(),
        channels: r.u16_le(),
        sample_rate: r.u32_le(),
        byte_rate: r.u32_le(),
        block_align: r.u16_le(),
        bits_per_sample: r.u16_le(),
    }
}

/// Skip fmt-chunk padding and assemble the next chunk header.
///
/// Oversized fmt chunks (size 18 with a zero cbSize) leave a run of zero
/// bytes before the next id; the first non-zero byte is the first id byte.
/// Returns the chunk length when the id is `data`.
fn read_data_header(r: &mut Reader) -> Option<u32> {
    let mut first = 0u8;
    while r.remaining() > 0 {
        first = r.byte();
        if first != 0 {
            break;
        }
    }
    if first == 0 {
        return None;
    }

    let rest = r.take(3);
    let mut id = [0u8; 4];
    id[0] = first;
    id[1..1 + rest.len()].copy_from_slice(rest);
    let len = r.u32_le();

    (id == *b"data").then_some(len)
}

/// Locate and parse the `cue ` chunk in the trailing region.
fn parse_cues(extra: &[u8]) -> Vec<CuePoint> {
    let Some(at) = find(extra, b"cue ", 0) else {
        return Vec::new();
    };

    let count = u32_at(extra, at + 8) as usize;
    let mut points = Vec::new();
    let mut rec = at + CUE_HEAD_LEN;
    for _ in 0..count {
        if rec + CUE_RECORD_LEN > extra.len() {
            break;
        }
        points.push(CuePoint {
            id: i32_at(extra, rec),
            position: u32_at(extra, rec + 4),
            // rec+8 is the linked chunk id ("data"), not stored
            chunk_start: u32_at(extra, rec + 12),
            block_start: u32_at(extra, rec + 16),
            sample_offset: u32_at(extra, rec + 20),
        });
        rec += CUE_RECORD_LEN;
    }
    points
}

/// Collect `labl` sub-chunks of the `LIST` chunk, in file order.
///
/// The length and cue-id fields are read as single low bytes and the name
/// spans `length − 5` bytes, truncated at the first NUL: the marker editors
/// the fleet's sound packs come from write labels this way, and the files
/// must keep loading (see DESIGN.md).
fn parse_labels(extra: &[u8], cues: &[CuePoint], block_align: u16) -> Vec<Label> {
    if cues.is_empty() {
        return Vec::new();
    }

    // Some editors write the LIST id in lowercase.
    if find(extra, b"LIST", 0).or_else(|| find(extra, b"list", 0)).is_none() {
        return Vec::new();
    }

    let mut labels = Vec::new();
    let mut search_from = 0usize;
    while let Some(at) = find(extra, b"labl", search_from) {
        let label_len = byte_at(extra, at + 4) as usize;
        let cue_id = i32::from(byte_at(extra, at + 8));

        let name_len = label_len.saturating_sub(5);
        let name_start = (at + 12).min(extra.len());
        let name_end = (name_start + name_len).min(extra.len());
        let mut raw = &extra[name_start..name_end];
        if let Some(nul) = raw.iter().position(|&b| b == 0) {
            raw = &raw[..nul];
        }

        let cue = cues.iter().find(|c| c.id == cue_id).unwrap_or(&cues[0]);
        labels.push(Label {
            name: String::from_utf8_lossy(raw).into_owned(),
            byte_offset: u64::from(cue.sample_offset) * u64::from(block_align),
        });

        search_from = at + 4;
    }
    labels
}

/// Slice the payload at the `loop`/`stop` label offsets.
///
/// Labels walk in file order; each usable label closes the current slot at
/// its offset and the remainder fills the next slot. Offsets are clamped to
/// the payload and a marker behind the cursor is ignored.
fn split_segments(payload: &[u8], labels: &[Label]) -> (SegmentSet, bool) {
    let mut slots: [Vec<u8>; SEGMENT_SLOTS] = Default::default();
    let mut slot = 0usize;
    let mut offset = 0usize;

    for label in labels {
        if slot + 1 >= SEGMENT_SLOTS {
            break;
        }
        if !SEGMENT_LABELS.contains(&label.name.as_str()) {
            continue;
        }
        let end = usize::try_from(label.byte_offset)
            .unwrap_or(usize::MAX)
            .min(payload.len());
        if end < offset {
            continue;
        }
        slots[slot] = payload[offset..end].to_vec();
        offset = end;
        slot += 1;
    }

    let labeled = slot > 0;
    slots[slot] = payload[offset..].to_vec();
    (SegmentSet { slots }, labeled)
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

fn u32_at(data: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    if let Some(slice) = data.get(at..at + 4) {
        raw.copy_from_slice(slice);
    }
    u32::from_le_bytes(raw)
}

fn i32_at(data: &[u8], at: usize) -> i32 {
    u32_at(data, at) as i32
}

fn byte_at(data: &[u8], at: usize) -> u8 {
    data.get(at).copied().unwrap_or(0)
}

#[cfg(test)]
pub(crate) mod test_wav {
    //! In-memory WAV builders shared by the engine's tests.

    /// Minimal canonical PCM file: header + fmt + data.
    pub fn build_wav(channels: u16, rate: u32, bits: u16, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        let riff_len = 4 + 24 + 8 + data.len() as u32;
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&riff_len.to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        append_fmt(&mut buf, channels, rate, bits, 16);
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(data);
        buf
    }

    pub fn append_fmt(buf: &mut Vec<u8>, channels: u16, rate: u32, bits: u16, chunk_len: u32) {
        let frame = channels * (bits / 8).max(1);
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&chunk_len.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&rate.to_le_bytes());
        buf.extend_from_slice(&(rate * u32::from(frame)).to_le_bytes());
        buf.extend_from_slice(&frame.to_le_bytes());
        buf.extend_from_slice(&bits.to_le_bytes());
        // chunk_len > 16 means trailing padding (cbSize etc.)
        for _ in 16..chunk_len {
            buf.push(0);
        }
    }

    /// Append a `cue ` chunk; `points` are (id, sample_offset) pairs.
    pub fn append_cue(buf: &mut Vec<u8>, points: &[(i32, u32)]) {
        let body = 4 + points.len() as u32 * 24;
        buf.extend_from_slice(b"cue ");
        buf.extend_from_slice(&body.to_le_bytes());
        buf.extend_from_slice(&(points.len() as u32).to_le_bytes());
        for (id, sample_offset) in points {
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(&sample_offset.to_le_bytes()); // position
            buf.extend_from_slice(b"data");
            buf.extend_from_slice(&0u32.to_le_bytes()); // chunk start
            buf.extend_from_slice(&0u32.to_le_bytes()); // block start
            buf.extend_from_slice(&sample_offset.to_le_bytes());
        }
    }

    /// Append a `LIST/adtl` chunk of `labl` entries; `labels` are
    /// (cue id, name) pairs.
    pub fn append_labels(buf: &mut Vec<u8>, labels: &[(i32, &str)]) {
        let body: u32 = 4 + labels
            .iter()
            .map(|(_, name)| 8 + 4 + name.len() as u32 + 1)
            .sum::<u32>();
        buf.extend_from_slice(b"LIST");
        buf.extend_from_slice(&body.to_le_bytes());
        buf.extend_from_slice(b"adtl");
        for (cue_id, name) in labels {
            buf.extend_from_slice(b"labl");
            buf.extend_from_slice(&(4 + name.len() as u32 + 1).to_le_bytes());
            buf.extend_from_slice(&cue_id.to_le_bytes());
            buf.extend_from_slice(name.as_bytes());
            buf.push(0);
        }
    }

    /// A mono-16 file whose payload carries `loop`/`stop` markers at the
    /// given frame offsets.
    pub fn build_labeled_wav(
        rate: u32,
        data: &[u8],
        loop_frame: u32,
        stop_frame: u32,
    ) -> Vec<u8> {
        let mut buf = build_wav(1, rate, 16, data);
        append_cue(&mut buf, &[(1, loop_frame), (2, stop_frame)]);
        append_labels(&mut buf, &[(1, "loop"), (2, "stop")]);
        buf
    }
}
