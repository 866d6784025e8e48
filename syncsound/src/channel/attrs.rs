//! Per-channel tunables exposed as numbered read/write attributes.
//!
//! Each channel `n` carries `packets_per_xact<n>` and `buffer_size<n>`,
//! grouped under [`ATTRIBUTE_GROUP`]. Values are read back as `"<value> "`
//! and written as kernel-style integers.

use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};

/// Name of the attribute group the tunables are published under.
pub const ATTRIBUTE_GROUP: &str = "syncsound";

pub const DEFAULT_PACKETS_PER_XACT: i32 = 255;

/// Sentinel: take the value from the bus (packets) or the maximum period
/// size (buffer).
pub const UNSET: i32 = -1;

#[derive(Debug)]
pub struct Tunables {
    packets_per_xact: AtomicI32,
    buffer_size: AtomicI32,
}

impl Tunables {
    pub fn new(packets_per_xact: i32, buffer_size: i32) -> Self {
        Self {
            packets_per_xact: AtomicI32::new(packets_per_xact),
            buffer_size: AtomicI32::new(buffer_size),
        }
    }

    pub fn packets_per_xact(&self) -> i32 {
        self.packets_per_xact.load(Ordering::Acquire)
    }

    pub fn set_packets_per_xact(&self, value: i32) {
        self.packets_per_xact.store(value, Ordering::Release);
    }

    pub fn buffer_size(&self) -> i32 {
        self.buffer_size.load(Ordering::Acquire)
    }

    pub fn set_buffer_size(&self, value: i32) {
        self.buffer_size.store(value, Ordering::Release);
    }

    pub fn get(&self, attr: Attribute) -> i32 {
        match attr {
            Attribute::PacketsPerXact => self.packets_per_xact(),
            Attribute::BufferSize => self.buffer_size(),
        }
    }

    pub fn set(&self, attr: Attribute, value: i32) {
        match attr {
            Attribute::PacketsPerXact => self.set_packets_per_xact(value),
            Attribute::BufferSize => self.set_buffer_size(value),
        }
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new(DEFAULT_PACKETS_PER_XACT, UNSET)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attribute {
    PacketsPerXact,
    BufferSize,
}

impl Attribute {
    pub const ALL: [Attribute; 2] = [Attribute::PacketsPerXact, Attribute::BufferSize];

    pub fn base_name(self) -> &'static str {
        match self {
            Self::PacketsPerXact => "packets_per_xact",
            Self::BufferSize => "buffer_size",
        }
    }

    /// Split `packets_per_xact3` into the attribute and channel index.
    pub fn parse_name(name: &str) -> Option<(Attribute, usize)> {
        Self::ALL.into_iter().find_map(|attr| {
            let index = name.strip_prefix(attr.base_name())?;
            if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            index.parse().ok().map(|i| (attr, i))
        })
    }

    pub fn name_for(self, channel: usize) -> String {
        format!("{}{}", self.base_name(), channel)
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.base_name())
    }
}

/// Parse an integer the way the kernel's `kstrtoint(s, 0, ..)` does:
/// optional sign, `0x` for hex, a leading `0` for octal, and at most one
/// trailing newline.
pub fn parse_kernel_int(text: &str) -> Option<i32> {
    let text = text.strip_suffix('\n').unwrap_or(text);
    let (negative, rest) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (radix, digits) = if let Some(hex) = rest
        .strip_prefix("0x")
        .or_else(|| rest.strip_prefix("0X"))
    {
        (16, hex)
    } else if rest.len() > 1 && rest.starts_with('0') {
        (8, &rest[1..])
    } else {
        (10, rest)
    };
    if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    let value = if negative { -magnitude } else { magnitude };
    i32::try_from(value).ok()
}

/// Extract the logical channel id from free-form connect arguments:
/// skip to the first decimal digit and parse the remainder.
pub fn parse_link_id(args: &str) -> Option<i32> {
    let start = args.find(|c: char| c.is_ascii_digit())?;
    parse_kernel_int(&args[start..])
}
