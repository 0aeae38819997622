//! Guarded stack
//!
//! A growable LIFO stack of [`Word`]s instrumented to detect memory
//! corruption at runtime:
//!
//! - canary words surround the element region of the backing buffer, and
//!   canary byte arrays are embedded at both ends of the struct itself;
//! - free slots are poisoned with a dead-byte pattern so stale reads are
//!   recognizable;
//! - a rolling hash over the stack's name, capacity, size and element region
//!   is recomputed after every mutation and verified before the next one.
//!
//! Every mutating operation is bracketed by [`GuardedStack::check`]. A failed
//! check reports the complete fault set together with a rendered diagnostic
//! dump; callers must treat that as a defect in the host program and stop
//! using the stack.

use crate::Word;
use std::fmt::Write as _;
use thiserror::Error;

/// Byte written into canary regions.
pub const GUARD_BYTE: u8 = 0xAB;
/// Byte written into freed or never-used element slots.
pub const DEAD_BYTE: u8 = 0xDE;

/// Width of the struct-embedded canary arrays, in bytes.
const GUARD_LEN: usize = 8;
/// Canary words placed before and after the element region of the buffer.
const GUARD_WORDS: usize = 2;

const GUARD_WORD: Word = Word::from_le_bytes([GUARD_BYTE; 8]);
const DEAD_WORD: Word = Word::from_le_bytes([DEAD_BYTE; 8]);

/// One violated invariant found by a consistency check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Capacity is zero on an initialized stack.
    ZeroCapacity,
    /// `size` exceeds `capacity`.
    SizeExceedsCapacity,
    /// Backing buffer length disagrees with `capacity`.
    BufferLength,
    /// Canary bytes at the front of the struct were overwritten.
    FrontStructGuard,
    /// Canary bytes at the back of the struct were overwritten.
    BackStructGuard,
    /// Canary words before the element region were overwritten.
    FrontBufferGuard,
    /// Canary words after the element region were overwritten.
    BackBufferGuard,
    /// Stored rolling hash does not match the recomputed one.
    HashMismatch,
}

/// Errors reported by guarded stack operations.
#[derive(Debug, Error)]
pub enum StackError {
    /// The stack is full and could not grow.
    #[error("stack {name:?} overflow at capacity {capacity}")]
    Overflow { name: &'static str, capacity: usize },
    /// Pop from an empty stack.
    #[error("stack {name:?} underflow")]
    Underflow { name: &'static str },
    /// Growing the backing buffer failed.
    #[error("stack {name:?} failed to allocate {words} words")]
    AllocFailed { name: &'static str, words: usize },
    /// Shrinking is not supported.
    #[error("stack {name:?} cannot shrink from {from} to {to}")]
    ShrinkUnsupported {
        name: &'static str,
        from: usize,
        to: usize,
    },
    /// A consistency check failed. The dump carries the full diagnostic
    /// report; the stack must not be used afterwards.
    #[error("stack {name:?} corrupted: {faults:?}\n{dump}")]
    Corrupted {
        name: &'static str,
        faults: Vec<Fault>,
        dump: String,
    },
}

/// Stack of [`Word`]s with canary regions, dead-byte poisoning and a rolling
/// content hash.
///
/// The backing buffer layout is:
///
/// ```text
/// [GUARD_WORDS canaries][capacity element slots][GUARD_WORDS canaries]
/// ```
///
/// Slots at indices `>= size` hold the dead pattern.
pub struct GuardedStack {
    front_guard: [u8; GUARD_LEN],
    name: &'static str,
    size: usize,
    capacity: usize,
    buf: Vec<Word>,
    hash: u32,
    back_guard: [u8; GUARD_LEN],
}

/// The original rolling hash: a byte-at-a-time linear congruential mix.
fn hash_bytes(hash: &mut u32, bytes: &[u8]) {
    for &b in bytes {
        *hash = hash
            .wrapping_mul(1_664_525)
            .wrapping_add(b as u32)
            .wrapping_add(1_013_904_223);
    }
}

impl GuardedStack {
    /// Creates a stack with the given initial capacity and a debug name.
    /// The name shows up in errors and dumps.
    pub fn new(capacity: usize, name: &'static str) -> Self {
        let capacity = capacity.max(1);

        let mut buf = vec![GUARD_WORD; GUARD_WORDS];
        buf.extend(std::iter::repeat(DEAD_WORD).take(capacity));
        buf.extend(std::iter::repeat(GUARD_WORD).take(GUARD_WORDS));

        let mut stack = Self {
            front_guard: [GUARD_BYTE; GUARD_LEN],
            name,
            size: 0,
            capacity,
            buf,
            hash: 0,
            back_guard: [GUARD_BYTE; GUARD_LEN],
        };
        stack.rehash();
        stack
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Pushes an element, doubling capacity when the stack fills up.
    pub fn push(&mut self, elem: Word) -> Result<(), StackError> {
        self.check()?;

        // Only reachable if a previous grow failed and the caller kept going.
        if self.size == self.capacity {
            return Err(StackError::Overflow {
                name: self.name,
                capacity: self.capacity,
            });
        }

        self.buf[GUARD_WORDS + self.size] = elem;
        self.size += 1;
        self.rehash();

        if self.size == self.capacity {
            self.reserve(self.capacity * 2)?;
        }

        self.check()
    }

    /// Pops the top element, poisoning the vacated slot.
    pub fn pop(&mut self) -> Result<Word, StackError> {
        self.check()?;

        if self.size == 0 {
            return Err(StackError::Underflow { name: self.name });
        }

        self.size -= 1;
        let elem = self.buf[GUARD_WORDS + self.size];
        self.buf[GUARD_WORDS + self.size] = DEAD_WORD;
        self.rehash();

        self.check()?;
        Ok(elem)
    }

    /// Grows the element region to `new_capacity` slots, repainting the back
    /// canaries and poisoning the new slots. Shrinking is rejected.
    pub fn reserve(&mut self, new_capacity: usize) -> Result<(), StackError> {
        self.check()?;

        if new_capacity < self.capacity {
            return Err(StackError::ShrinkUnsupported {
                name: self.name,
                from: self.capacity,
                to: new_capacity,
            });
        }
        if new_capacity == self.capacity {
            return Ok(());
        }

        let new_len = GUARD_WORDS + new_capacity + GUARD_WORDS;
        let extra = new_len - self.buf.len();
        self.buf
            .try_reserve_exact(extra)
            .map_err(|_| StackError::AllocFailed {
                name: self.name,
                words: new_len,
            })?;

        // Drop the old back canaries, poison the grown region, repaint.
        self.buf.truncate(GUARD_WORDS + self.capacity);
        self.buf
            .extend(std::iter::repeat(DEAD_WORD).take(new_capacity - self.capacity));
        self.buf.extend(std::iter::repeat(GUARD_WORD).take(GUARD_WORDS));

        self.capacity = new_capacity;
        self.rehash();

        self.check()
    }

    /// Verifies every invariant and reports the full fault set on failure.
    pub fn check(&self) -> Result<(), StackError> {
        let faults = self.collect_faults();
        if faults.is_empty() {
            return Ok(());
        }
        let dump = self.render_dump(&faults);
        Err(StackError::Corrupted {
            name: self.name,
            faults,
            dump,
        })
    }

    fn collect_faults(&self) -> Vec<Fault> {
        let mut faults = Vec::new();

        if self.capacity == 0 {
            faults.push(Fault::ZeroCapacity);
        }
        if self.size > self.capacity {
            faults.push(Fault::SizeExceedsCapacity);
        }
        if self.buf.len() != GUARD_WORDS + self.capacity + GUARD_WORDS {
            faults.push(Fault::BufferLength);
        }

        if self.front_guard != [GUARD_BYTE; GUARD_LEN] {
            faults.push(Fault::FrontStructGuard);
        }
        if self.back_guard != [GUARD_BYTE; GUARD_LEN] {
            faults.push(Fault::BackStructGuard);
        }

        // Buffer canaries and hash only make sense over a sane layout.
        if !faults.contains(&Fault::BufferLength) {
            if self.buf[..GUARD_WORDS].iter().any(|&w| w != GUARD_WORD) {
                faults.push(Fault::FrontBufferGuard);
            }
            if self.buf[GUARD_WORDS + self.capacity..]
                .iter()
                .any(|&w| w != GUARD_WORD)
            {
                faults.push(Fault::BackBufferGuard);
            }
            if self.compute_hash() != self.hash {
                faults.push(Fault::HashMismatch);
            }
        }

        faults
    }

    /// Hash over name, capacity, size and the whole element region, live and
    /// dead slots alike.
    fn compute_hash(&self) -> u32 {
        let mut hash = 0u32;
        hash_bytes(&mut hash, self.name.as_bytes());
        hash_bytes(&mut hash, &(self.capacity as u64).to_le_bytes());
        hash_bytes(&mut hash, &(self.size as u64).to_le_bytes());
        for word in &self.buf[GUARD_WORDS..GUARD_WORDS + self.capacity] {
            hash_bytes(&mut hash, &word.to_le_bytes());
        }
        hash
    }

    fn rehash(&mut self) {
        self.hash = self.compute_hash();
    }

    /// Renders the diagnostic dump: name, geometry, canary bytes, hashes and
    /// the element region with dead-pattern annotations.
    fn render_dump(&self, faults: &[Fault]) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "## STACK DUMP");
        let _ = writeln!(out, "## Stack name:\t{}", self.name);
        let _ = writeln!(out, "## Capacity:\t{}", self.capacity);
        let _ = writeln!(out, "## Size:\t{}", self.size);

        let _ = writeln!(
            out,
            "## Struct guards (should all be |{:02x}|):",
            GUARD_BYTE
        );
        let _ = write!(out, "## Front:\t");
        for b in self.front_guard {
            let _ = write!(out, "|{b:02x}|");
        }
        let _ = write!(out, "\n## Back:\t");
        for b in self.back_guard {
            let _ = write!(out, "|{b:02x}|");
        }
        let _ = writeln!(out);

        if !faults.contains(&Fault::BufferLength) {
            let _ = writeln!(
                out,
                "## Buffer guards (should all be |{GUARD_WORD:016x}|):"
            );
            let _ = writeln!(out, "## Front:\t{:016x?}", &self.buf[..GUARD_WORDS]);
            let _ = writeln!(
                out,
                "## Back:\t{:016x?}",
                &self.buf[GUARD_WORDS + self.capacity..]
            );
            let _ = writeln!(
                out,
                "## Hash:\t{} (should be {})",
                self.hash,
                self.compute_hash()
            );

            let _ = writeln!(out, "## Elements:");
            for (i, &word) in self.buf[GUARD_WORDS..GUARD_WORDS + self.capacity]
                .iter()
                .enumerate()
            {
                let live = i < self.size;
                let mark = if live { '+' } else { '-' };
                let _ = write!(out, "## {mark} [{i}]\t{word}");
                if word == DEAD_WORD {
                    let _ = write!(out, " ({})", if live { "POSSIBLY DEAD" } else { "DEAD" });
                }
                let _ = writeln!(out);
            }
        }

        out
    }
}

impl Drop for GuardedStack {
    fn drop(&mut self) {
        // Poison everything so dangling readers see the dead pattern.
        for word in &mut self.buf {
            *word = DEAD_WORD;
        }
        self.size = 0;
        self.capacity = 0;
    }
}

impl std::fmt::Debug for GuardedStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedStack")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("capacity", &self.capacity)
            .finish()
    }
}
