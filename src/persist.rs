//! Expiry filtering of persistent streams.
//!
//! Persistent entries outlive the tick they were submitted in. Once per tick
//! the drawer runs [`filter_persistent`] over each of them: duration scopes
//! whose end time has passed are dropped together with everything nested in
//! them, and scopes left empty are rolled back exactly like the splitter
//! does. The filter works in place by copying surviving records forward.

use crate::buffer::CommandBuffer;
use crate::command::{PersistData, RecordReader, ScopeKind, Tag, TagClass};
use crate::error::{DrawError, DrawResult};

/// Outcome of filtering one persistent entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOutcome {
    /// Something survived.
    Alive,
    /// Nothing is left; the entry can be released.
    Dead,
}

#[derive(Debug, Clone, Copy)]
struct OpenScope {
    kind: ScopeKind,
    start: usize,
    wrote: bool,
}

/// Filter `buffer` in place against the drawer clock `now`.
///
/// A duration scope with `end_time <= now` is expired. If `entry_generation`
/// differs from `generation` the buffer is cleared regardless of expiry.
/// Malformed streams are cleared as well and the error is returned.
pub fn filter_persistent(
    buffer: &mut CommandBuffer,
    now: f64,
    generation: u64,
    entry_generation: u64,
    max_depth: usize,
) -> DrawResult<FilterOutcome> {
    if generation != entry_generation {
        buffer.clear();
        return Ok(FilterOutcome::Dead);
    }
    match filter_in_place(buffer, now, max_depth) {
        Ok(len) => {
            buffer.truncate(len);
            Ok(if len == 0 {
                FilterOutcome::Dead
            } else {
                FilterOutcome::Alive
            })
        }
        Err(err) => {
            buffer.clear();
            Err(err)
        }
    }
}

/// Returns the filtered length. Bytes past it are garbage.
fn filter_in_place(buffer: &mut CommandBuffer, now: f64, max_depth: usize) -> DrawResult<usize> {
    let mut read = 0;
    let mut write = 0;
    let mut open: Vec<OpenScope> = Vec::new();
    // Scopes of the expired subtree currently being skipped.
    let mut skipped: Vec<ScopeKind> = Vec::new();

    while read < buffer.len() {
        let (tag, size, end_time) = {
            let mut reader = RecordReader::new(&buffer.as_bytes()[read..]);
            let record = match reader.next() {
                Some(record) => record.map_err(|e| rebase(e, read))?,
                None => break,
            };
            let end_time = match record.tag {
                Tag::PushDuration => Some(record.payload::<PersistData>()?.end_time),
                _ => None,
            };
            (record.tag, record.size, end_time)
        };
        let record_start = read;
        read += size;

        if !skipped.is_empty() {
            match tag.class() {
                TagClass::Push(kind) => {
                    let depth = open.iter().filter(|s| s.kind == kind).count()
                        + skipped.iter().filter(|&&k| k == kind).count();
                    if depth >= max_depth {
                        return Err(DrawError::StackOverflow {
                            kind,
                            max: max_depth,
                        });
                    }
                    skipped.push(kind);
                }
                TagClass::Pop(kind) => match skipped.pop() {
                    Some(top) if top == kind => {}
                    _ => return Err(DrawError::StackUnderflow(kind)),
                },
                TagClass::Draw(_) => {}
            }
            continue;
        }

        match tag.class() {
            TagClass::Push(kind) => {
                let depth = open.iter().filter(|s| s.kind == kind).count();
                if depth >= max_depth {
                    return Err(DrawError::StackOverflow {
                        kind,
                        max: max_depth,
                    });
                }
                if end_time.is_some_and(|end| end <= now) {
                    skipped.push(kind);
                    continue;
                }
                open.push(OpenScope {
                    kind,
                    start: write,
                    wrote: false,
                });
                buffer.move_down(record_start, size, write);
                write += size;
            }
            TagClass::Pop(kind) => {
                let scope = match open.pop() {
                    Some(scope) if scope.kind == kind => scope,
                    _ => return Err(DrawError::StackUnderflow(kind)),
                };
                if scope.wrote {
                    buffer.move_down(record_start, size, write);
                    write += size;
                    if let Some(parent) = open.last_mut() {
                        parent.wrote = true;
                    }
                } else {
                    write = scope.start;
                }
            }
            TagClass::Draw(_) => {
                buffer.move_down(record_start, size, write);
                write += size;
                if let Some(scope) = open.last_mut() {
                    scope.wrote = true;
                }
            }
        }
    }

    let unclosed = open.len() + skipped.len();
    if unclosed > 0 {
        return Err(DrawError::UnbalancedScopes { open: unclosed });
    }
    Ok(write)
}

/// Offsets reported by a reader over a sub-slice are relative to the slice.
fn rebase(err: DrawError, base: usize) -> DrawError {
    match err {
        DrawError::UnknownTag { tag, offset } => DrawError::UnknownTag {
            tag,
            offset: offset + base,
        },
        DrawError::Truncated {
            offset,
            needed,
            available,
        } => DrawError::Truncated {
            offset: offset + base,
            needed,
            available,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::LineData;
    use glam::Vec3;

    fn tag(buf: &mut CommandBuffer, tag: Tag) {
        buf.write_pod(&(tag as u32));
    }

    fn duration(buf: &mut CommandBuffer, end_time: f64) {
        tag(buf, Tag::PushDuration);
        buf.write_pod(&PersistData { end_time });
    }

    fn line(buf: &mut CommandBuffer) {
        tag(buf, Tag::Line);
        buf.write_pod(&LineData {
            a: Vec3::ZERO,
            b: Vec3::Y,
        });
    }

    fn two_scopes() -> CommandBuffer {
        let mut buf = CommandBuffer::new();
        duration(&mut buf, 1.0);
        line(&mut buf);
        tag(&mut buf, Tag::PopDuration);
        duration(&mut buf, 3.0);
        line(&mut buf);
        tag(&mut buf, Tag::PopDuration);
        buf
    }

    #[test]
    fn live_scopes_are_untouched() {
        let mut buf = two_scopes();
        let original = buf.as_bytes().to_vec();
        assert_eq!(
            filter_persistent(&mut buf, 0.5, 0, 0, 32),
            Ok(FilterOutcome::Alive)
        );
        assert_eq!(buf.as_bytes(), &original[..]);
    }

    #[test]
    fn expired_scope_is_removed_and_later_one_moved_forward() {
        let mut buf = two_scopes();
        let half = buf.len() / 2;
        let second_half = buf.as_bytes()[half..].to_vec();

        assert_eq!(
            filter_persistent(&mut buf, 1.0, 0, 0, 32),
            Ok(FilterOutcome::Alive)
        );
        assert_eq!(buf.as_bytes(), &second_half[..]);

        // Idempotent once expired.
        assert_eq!(
            filter_persistent(&mut buf, 2.0, 0, 0, 32),
            Ok(FilterOutcome::Alive)
        );
        assert_eq!(buf.as_bytes(), &second_half[..]);

        assert_eq!(
            filter_persistent(&mut buf, 3.0, 0, 0, 32),
            Ok(FilterOutcome::Dead)
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn nested_content_of_expired_scope_is_skipped() {
        let mut buf = CommandBuffer::new();
        duration(&mut buf, 5.0);
        duration(&mut buf, 1.0);
        tag(&mut buf, Tag::PushColor);
        buf.write_pod(&crate::color::Color::RED);
        line(&mut buf);
        tag(&mut buf, Tag::PopColor);
        tag(&mut buf, Tag::PopDuration);
        tag(&mut buf, Tag::PopDuration);

        // The outer scope survives but ends up empty, so it is rolled back.
        assert_eq!(
            filter_persistent(&mut buf, 2.0, 0, 0, 32),
            Ok(FilterOutcome::Dead)
        );
    }

    #[test]
    fn generation_mismatch_kills_entry() {
        let mut buf = two_scopes();
        assert_eq!(
            filter_persistent(&mut buf, 0.0, 2, 1, 32),
            Ok(FilterOutcome::Dead)
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn malformed_stream_is_cleared() {
        let mut buf = CommandBuffer::new();
        duration(&mut buf, 5.0);
        line(&mut buf);
        assert_eq!(
            filter_persistent(&mut buf, 0.0, 0, 0, 32),
            Err(DrawError::UnbalancedScopes { open: 1 })
        );
        assert!(buf.is_empty());
    }
}
