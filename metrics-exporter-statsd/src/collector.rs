use std::vec::IntoIter;

use bytes::{BufMut as _, Bytes, BytesMut};
use metrics::Label;

pub(crate) const SMALLEST_VALID_PAYLOAD: &[u8] = b"a:0|c";

#[derive(Clone, Copy)]
enum MetricType {
    Counter,
    Gauge,
    Timer,
    Set,
}

impl MetricType {
    fn as_bytes(self) -> &'static [u8] {
        match self {
            MetricType::Counter => b"|c",
            MetricType::Gauge => b"|g",
            MetricType::Timer => b"|ms",
            MetricType::Set => b"|s",
        }
    }
}

#[derive(Clone, Copy)]
enum MetricValue {
    Integer(i64),
    FloatingPoint(f64),

    // Gauge deltas always carry their sign, otherwise a positive delta reads as an absolute value.
    SignedFloatingPoint(f64),
}

struct MetricValueFormatter {
    int_writer: itoa::Buffer,
    float_writer: ryu::Buffer,
    signed_buf: String,
}

impl MetricValueFormatter {
    fn new() -> Self {
        Self {
            int_writer: itoa::Buffer::new(),
            float_writer: ryu::Buffer::new(),
            signed_buf: String::new(),
        }
    }

    /// Formats the value, or returns `None` if the value has no StatsD representation.
    fn format(&mut self, value: MetricValue) -> Option<&str> {
        match value {
            MetricValue::Integer(v) => Some(self.int_writer.format(v)),
            MetricValue::FloatingPoint(v) if v.is_finite() => Some(self.float_writer.format(v)),
            MetricValue::SignedFloatingPoint(v) if v.is_finite() => {
                let formatted = self.float_writer.format(v);
                self.signed_buf.clear();
                if !formatted.starts_with('-') {
                    self.signed_buf.push('+');
                }
                self.signed_buf.push_str(formatted);
                Some(self.signed_buf.as_str())
            }
            _ => None,
        }
    }
}

/// Accumulates pending metrics as serialized StatsD lines, packed into datagram-sized payloads.
///
/// StatsD lines are newline delimited, so several of them can share a single datagram and be split apart again by the
/// server. The collector keeps one contiguous buffer of finished payloads, and tracks where each payload ends. A line
/// is never split across payloads: when the next line would push the current payload over the maximum payload length,
/// the current payload is finalized and the line starts a new one.
///
/// The collector is not synchronized. Callers must guard it with their own lock.
pub(crate) struct Collector {
    max_payload_len: usize,
    prefix: Option<String>,
    payloads_buf: BytesMut,
    offsets: Vec<usize>,
    line_buf: Vec<u8>,
    points_dropped: u64,
}

impl Collector {
    /// Creates a new `Collector` with the given maximum payload length.
    pub fn new(max_payload_len: usize) -> Self {
        // NOTE: The builder validates this too, but we want to be sure we never build a collector that can't hold a
        // single metric.
        assert!(
            max_payload_len >= SMALLEST_VALID_PAYLOAD.len(),
            "maximum payload length is too small to allow any metrics to be written (must be {} or greater)",
            SMALLEST_VALID_PAYLOAD.len()
        );

        Self {
            max_payload_len,
            prefix: None,
            payloads_buf: BytesMut::new(),
            offsets: Vec::new(),
            line_buf: Vec::new(),
            points_dropped: 0,
        }
    }

    /// Sets the prefix applied to every metric name, as `<prefix>.<name>`.
    ///
    /// An empty prefix is the same as no prefix.
    pub fn with_prefix(mut self, prefix: Option<String>) -> Self {
        self.prefix = prefix.filter(|p| !p.is_empty());
        self
    }

    fn last_offset(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Returns the number of bytes in the current, unfinalized payload.
    fn current_payload_len(&self) -> usize {
        self.payloads_buf.len() - self.last_offset()
    }

    /// Finalizes the current payload, if it has anything in it.
    fn finalize_current_payload(&mut self) {
        if self.current_payload_len() == 0 {
            return;
        }

        self.offsets.push(self.payloads_buf.len());
    }

    /// Commits the line buffer to the current payload.
    ///
    /// Returns `false`, and counts a dropped point, if the line alone exceeds the maximum payload length.
    fn commit(&mut self) -> bool {
        let line_len = self.line_buf.len();
        if line_len > self.max_payload_len {
            self.points_dropped += 1;
            return false;
        }

        // Lines within a payload are separated, not terminated, by a newline.
        let mut current_payload_len = self.current_payload_len();
        if current_payload_len != 0 && current_payload_len + 1 + line_len > self.max_payload_len {
            self.finalize_current_payload();
            current_payload_len = 0;
        }

        if current_payload_len != 0 {
            self.payloads_buf.put_u8(b'\n');
        }
        self.payloads_buf.extend_from_slice(&self.line_buf);

        true
    }

    fn write_line(
        &mut self,
        name: &str,
        value: MetricValue,
        metric_type: MetricType,
        rate: f64,
        tags: &[Label],
    ) -> bool {
        let mut formatter = MetricValueFormatter::new();
        let Some(value_str) = formatter.format(value) else {
            self.points_dropped += 1;
            return false;
        };

        self.line_buf.clear();
        if let Some(prefix) = &self.prefix {
            self.line_buf.extend_from_slice(prefix.as_bytes());
            self.line_buf.push(b'.');
        }
        self.line_buf.extend_from_slice(name.as_bytes());
        self.line_buf.push(b':');
        self.line_buf.extend_from_slice(value_str.as_bytes());
        self.line_buf.extend_from_slice(metric_type.as_bytes());

        // A rate of 1.0 is the implied default, so it's only written when the metric was actually sampled.
        if rate < 1.0 {
            let mut float_writer = ryu::Buffer::new();
            self.line_buf.extend_from_slice(b"|@");
            self.line_buf.extend_from_slice(float_writer.format(rate).as_bytes());
        }

        for (i, tag) in tags.iter().enumerate() {
            if i == 0 {
                self.line_buf.extend_from_slice(b"|#");
            } else {
                self.line_buf.push(b',');
            }

            write_tag(&mut self.line_buf, tag);
        }

        self.commit()
    }

    /// Pushes a counter change of `delta`.
    pub fn push_counter(&mut self, name: &str, delta: i64, rate: f64, tags: &[Label]) -> bool {
        self.write_line(name, MetricValue::Integer(delta), MetricType::Counter, rate, tags)
    }

    /// Pushes a timing of `ms` milliseconds.
    pub fn push_timer(&mut self, name: &str, ms: f64, rate: f64, tags: &[Label]) -> bool {
        self.write_line(name, MetricValue::FloatingPoint(ms), MetricType::Timer, rate, tags)
    }

    /// Pushes a timing of a whole number of milliseconds.
    pub fn push_whole_timer(&mut self, name: &str, ms: i64, rate: f64, tags: &[Label]) -> bool {
        self.write_line(name, MetricValue::Integer(ms), MetricType::Timer, rate, tags)
    }

    /// Pushes a gauge value.
    ///
    /// When `delta` is `true`, the value is written with an explicit sign so the server applies it relative to the
    /// current value. Otherwise, the value is written as-is. Callers are responsible for resetting the gauge first
    /// when setting an absolute negative value, since `-x` is always read as a decrement.
    pub fn push_gauge(
        &mut self,
        name: &str,
        value: f64,
        rate: f64,
        delta: bool,
        tags: &[Label],
    ) -> bool {
        let value = if delta {
            MetricValue::SignedFloatingPoint(value)
        } else if value == 0.0 {
            // Normalizes `-0.0`, which would otherwise be read as a delta.
            MetricValue::FloatingPoint(0.0)
        } else {
            MetricValue::FloatingPoint(value)
        };

        self.write_line(name, value, MetricType::Gauge, rate, tags)
    }

    /// Pushes a set member.
    pub fn push_set(&mut self, name: &str, value: i64, rate: f64, tags: &[Label]) -> bool {
        self.write_line(name, MetricValue::Integer(value), MetricType::Set, rate, tags)
    }

    /// Returns `true` if nothing has been written since the last flush.
    pub fn is_empty(&self) -> bool {
        self.payloads_buf.is_empty()
    }

    /// Drains all pending payloads into a `Batch`, leaving the collector empty.
    pub fn flush(&mut self) -> Batch {
        self.finalize_current_payload();
        self.line_buf.clear();

        let buf = self.payloads_buf.split().freeze();
        let offsets = std::mem::take(&mut self.offsets);
        let points_dropped = std::mem::take(&mut self.points_dropped);

        Batch { buf, offsets: offsets.into_iter(), start: 0, points_dropped }
    }
}

/// Payloads drained from a `Collector` in a single flush.
///
/// Yields each payload, in the order it was written, exactly once. The batch owns its memory, so it can be consumed
/// after the collector's lock has been released.
pub(crate) struct Batch {
    buf: Bytes,
    offsets: IntoIter<usize>,
    start: usize,
    points_dropped: u64,
}

impl Batch {
    /// Returns the number of points that were dropped because they could not be serialized.
    pub const fn points_dropped(&self) -> u64 {
        self.points_dropped
    }
}

impl Iterator for Batch {
    type Item = Bytes;

    fn next(&mut self) -> Option<Self::Item> {
        let end = self.offsets.next()?;
        let payload = self.buf.slice(self.start..end);
        self.start = end;

        Some(payload)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.offsets.size_hint()
    }
}

impl ExactSizeIterator for Batch {}

fn write_tag(buf: &mut Vec<u8>, label: &Label) {
    // If the label value is empty, we treat it as a bare label. This means all we write is something like
    // `label_name`, instead of a more naive form, like `label_name:`.
    buf.extend_from_slice(label.key().as_bytes());
    if label.value().is_empty() {
        return;
    }

    buf.push(b':');
    buf.extend_from_slice(label.value().as_bytes());
}
