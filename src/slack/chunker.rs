//! Byte-bounded splitting of reply text into Slack-sized chunks.
//!
//! Text is cut into words, each remembering whether it followed a space or a
//! line break, and the words are packed greedily into chunks measured in
//! encoded bytes. When a word no longer fits and its line began inside the
//! current chunk, the whole line moves on to the next chunk, so a line is only
//! broken when it does not fit a chunk of its own. Text without any whitespace
//! is cut on UTF-8 code point boundaries instead.
//!
//! Every decision depends only on the text before it. As a streamed answer
//! grows, all chunks but the last keep their content, so messages already
//! finalised in Slack never need another edit.
//!
//! A code fence that is open at a boundary is closed at the end of the chunk
//! and re-opened (with the original opening line) at the start of the next
//! one. Both are counted against the byte budget, and a fence opening line is
//! never left alone at the end of a chunk.

const FENCE: &str = "```";
const FENCE_CLOSE: &str = "\n```";
/// Room kept free inside a fence: a closing fence line that is still
/// streaming in (up to "\n``") plus the synthetic closing fence.
const FENCE_RESERVE: usize = FENCE.len() + FENCE_CLOSE.len();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Separator {
    None,
    Space,
    Newline,
}

impl Separator {
    const fn as_str(self) -> &'static str {
        match self {
            Self::None => "",
            Self::Space => " ",
            Self::Newline => "\n",
        }
    }
}

/// Smallest piece the packer moves around, with the separator that preceded
/// it in the source text.
#[derive(Debug, Clone, Copy)]
struct Unit<'a> {
    text: &'a str,
    sep: Separator,
    starts_line: bool,
}

impl Unit<'_> {
    fn toggles_fence(&self) -> bool {
        fence_count(self.text) % 2 == 1
    }

}

/// Split `text` into chunks of at most `max_bytes` UTF-8 bytes.
///
/// Text that already fits is returned unchanged as the only chunk, as is
/// whitespace-only text. A single word that cannot fit a chunk (including the
/// fence lines it needs) is emitted as one oversized chunk rather than being
/// cut.
///
/// ```
/// use threadrelay::slack::chunker::chunk;
///
/// assert_eq!(chunk("hello", 100), vec!["hello".to_string()]);
///
/// let chunks = chunk(&"你好世界".repeat(100), 500);
/// assert!(chunks.len() > 1);
/// assert!(chunks.iter().all(|c| c.len() <= 500));
/// ```
#[must_use]
pub fn chunk(text: &str, max_bytes: usize) -> Vec<String> {
    if text.len() <= max_bytes || text.trim().is_empty() {
        return vec![text.to_string()];
    }

    let mut packer = Packer::new(max_bytes);
    for unit in split_units(text, max_bytes) {
        packer.push(unit);
    }

    let chunks = packer.finish();
    if chunks.is_empty() {
        return vec![text.to_string()];
    }
    chunks
}

fn split_units(text: &str, max_bytes: usize) -> Vec<Unit<'_>> {
    if !text.contains([' ', '\n']) {
        return byte_slices(text, max_bytes)
            .into_iter()
            .enumerate()
            .map(|(i, text)| Unit {
                text,
                sep: Separator::None,
                starts_line: i == 0,
            })
            .collect();
    }

    let mut units = Vec::new();
    for (i, line) in text.split('\n').enumerate() {
        for (j, word) in line.split(' ').enumerate() {
            let sep = match (i, j) {
                (0, 0) => Separator::None,
                (_, 0) => Separator::Newline,
                _ => Separator::Space,
            };
            units.push(Unit {
                text: word,
                sep,
                starts_line: j == 0,
            });
        }
    }
    units
}

/// Cut `text` into slices of at most `max_bytes`, never inside a code point.
fn byte_slices(text: &str, max_bytes: usize) -> Vec<&str> {
    let mut slices = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        if rest.len() <= max_bytes {
            slices.push(rest);
            break;
        }

        let mut end = max_bytes;
        while end > 0 && !rest.is_char_boundary(end) {
            end -= 1;
        }
        if end == 0 {
            // max_bytes is narrower than the leading code point
            end = rest.char_indices().nth(1).map_or(rest.len(), |(i, _)| i);
        }

        let (head, tail) = rest.split_at(end);
        slices.push(head);
        rest = tail;
    }

    slices
}

fn fence_count(text: &str) -> usize {
    text.matches(FENCE).count()
}

/// The line used to re-open a fence in the next chunk. Keeps a language tag
/// such as ```` ```rust ```` when the fence opened on a word of its own.
fn fence_opener(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with(FENCE) && fence_count(trimmed) == 1 {
        trimmed.to_string()
    } else {
        FENCE.to_string()
    }
}

#[derive(Debug, Clone, Default)]
struct Fence {
    open: bool,
    opener: String,
}

impl Fence {
    fn apply(&mut self, unit: &Unit<'_>) {
        if unit.toggles_fence() {
            if !self.open {
                self.opener = fence_opener(unit.text);
            }
            self.open = !self.open;
        }
    }

    /// Bytes of the synthetic opening line a chunk starting here carries.
    fn reopen_len(&self) -> usize {
        if self.open { self.opener.len() + 1 } else { 0 }
    }
}

struct Packer<'a> {
    max_bytes: usize,
    chunks: Vec<String>,
    /// Fence state where the current chunk starts.
    start: Fence,
    /// Fence state after the last placed unit.
    fence: Fence,
    units: Vec<Unit<'a>>,
    /// Encoded length of the current chunk, without its closing fence.
    len: usize,
}

impl<'a> Packer<'a> {
    fn new(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            chunks: Vec::new(),
            start: Fence::default(),
            fence: Fence::default(),
            units: Vec::new(),
            len: 0,
        }
    }

    fn push(&mut self, unit: Unit<'a>) {
        if self.units.is_empty() {
            // A blank unit at a chunk boundary is absorbed by the boundary.
            if !unit.text.is_empty() {
                self.place(unit);
            }
            return;
        }

        if self.fits(&unit) {
            self.place(unit);
            return;
        }

        if self.is_closing_fence(&unit) && !unit.text.is_empty() {
            // The synthetic closing fence stands in for this one.
            self.close_at(self.units.len());
            self.start = Fence::default();
            self.fence = Fence::default();
            return;
        }

        let Some(at) = self.boundary(&unit) else {
            // Only a fence opening line so far; it stays with its first line.
            self.place(unit);
            return;
        };
        self.close_at(at);
        self.push(unit);
    }

    /// A line that is, or may still grow into, the fence closing the open
    /// code block. Blank lines count, since the next byte may be a backtick.
    fn is_closing_fence(&self, unit: &Unit<'_>) -> bool {
        self.fence.open && unit.sep == Separator::Newline && FENCE.starts_with(unit.text)
    }

    /// Whether `unit` fits the current chunk, leaving room for fence lines
    /// whenever they might be needed. A closing fence line costs the same
    /// however much of it has arrived.
    fn fits(&self, unit: &Unit<'_>) -> bool {
        let needed = if self.is_closing_fence(unit) {
            FENCE_RESERVE
        } else {
            let reserve = if self.fence.open || unit.text.contains(FENCE) {
                FENCE_RESERVE
            } else {
                0
            };
            unit.sep.as_str().len() + unit.text.len() + reserve
        };
        self.len + needed <= self.max_bytes
    }

    fn place(&mut self, unit: Unit<'a>) {
        if self.units.is_empty() {
            self.len = self.start.reopen_len();
        } else {
            self.len += unit.sep.as_str().len();
        }
        self.len += unit.text.len();
        self.fence.apply(&unit);
        self.units.push(unit);
    }

    /// Index to end the current chunk at before `unit` is placed again, or
    /// `None` when the chunk holds nothing but a fence opening line.
    fn boundary(&self, unit: &Unit<'_>) -> Option<usize> {
        let end = self.units.len();
        let line_start = self.line_start();
        let mut at = if unit.sep == Separator::Newline || line_start == 0 {
            end
        } else {
            line_start
        };

        if at < end || unit.sep == Separator::Newline {
            while let Some(start) = self.opener_line_before(at) {
                if start == 0 {
                    return (at < end).then_some(end);
                }
                at = start;
            }
        }

        if at < end && !self.tail_fits_alone(at) {
            return Some(end);
        }
        Some(at)
    }

    /// Index of the first unit of the line the last placed unit belongs to.
    fn line_start(&self) -> usize {
        self.units.iter().rposition(|u| u.starts_line).unwrap_or(0)
    }

    /// Start of the line ending just before `at` when that line is nothing
    /// but a fence opening.
    fn opener_line_before(&self, at: usize) -> Option<usize> {
        let start = at.checked_sub(1)?;
        let unit = &self.units[start];
        (unit.starts_line && unit.toggles_fence() && !self.fence_at(start).open).then_some(start)
    }

    fn fence_at(&self, index: usize) -> Fence {
        let mut fence = self.start.clone();
        for unit in &self.units[..index] {
            fence.apply(unit);
        }
        fence
    }

    /// Whether the units from `at` on fit a chunk of their own.
    fn tail_fits_alone(&self, at: usize) -> bool {
        let mut len = self.fence_at(at).reopen_len();
        for (i, unit) in self.units[at..].iter().enumerate() {
            if i > 0 {
                len += unit.sep.as_str().len();
            }
            len += unit.text.len();
        }
        let reserve = if self.fence.open { FENCE_RESERVE } else { 0 };
        len + reserve <= self.max_bytes
    }

    /// Emit the units before `at` as a chunk and start the next chunk with
    /// the rest.
    fn close_at(&mut self, at: usize) {
        let moved = self.units.split_off(at);
        let end = self.fence_at(at);

        if self.units.iter().any(|u| !u.text.is_empty()) {
            let mut text = String::with_capacity(self.len + FENCE_CLOSE.len());
            if self.start.open {
                text.push_str(&self.start.opener);
                text.push('\n');
            }
            for (i, unit) in self.units.iter().enumerate() {
                if i > 0 {
                    text.push_str(unit.sep.as_str());
                }
                text.push_str(unit.text);
            }
            if end.open {
                text.push_str(FENCE_CLOSE);
            }
            self.chunks.push(text);
        }

        self.units.clear();
        self.len = 0;
        self.start = end.clone();
        self.fence = end;
        for unit in moved {
            self.place(unit);
        }
    }

    fn finish(mut self) -> Vec<String> {
        if !self.units.is_empty() {
            self.close_at(self.units.len());
        }
        self.chunks
    }
}
