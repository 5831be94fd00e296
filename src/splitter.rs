//! Partition a submission into static, dynamic and persistent streams.
//!
//! The splitter walks every writer buffer of one submission once and copies
//! each record into the output of its [`Category`]. Scope records (push/pop)
//! are mirrored into every category so each output replays with the same
//! state nesting; a scope that received no drawing records in a category is
//! rolled back on its pop, so categories without content keep zero bytes.
//!
//! Inside a duration scope every record, whatever its tag, goes to the
//! persistent output only.
//!
//! Any protocol violation aborts the whole submission: all three outputs are
//! cleared and the error is returned.

use crate::buffer::CommandBuffer;
use crate::command::{Category, RecordReader, ScopeKind, TagClass};
use crate::error::{DrawError, DrawResult};

/// One output-side scope: where it started and whether anything was drawn in it.
#[derive(Debug, Clone, Copy)]
struct OpenScope {
    start: usize,
    wrote: bool,
}

/// One input-side scope and the categories its push was mirrored into.
#[derive(Debug, Clone, Copy)]
struct InputScope {
    kind: ScopeKind,
    mirrored: [bool; 3],
}

struct SplitState<'a> {
    outputs: &'a mut [CommandBuffer; 3],
    open: [Vec<OpenScope>; 3],
    scopes: Vec<InputScope>,
    depth: [usize; 4],
    persist_depth: usize,
    max_depth: usize,
}

fn kind_index(kind: ScopeKind) -> usize {
    match kind {
        ScopeKind::Matrix => 0,
        ScopeKind::Color => 1,
        ScopeKind::LineWidth => 2,
        ScopeKind::Duration => 3,
    }
}

impl SplitState<'_> {
    fn push(&mut self, kind: ScopeKind, record: &[u8]) -> DrawResult<()> {
        let depth = &mut self.depth[kind_index(kind)];
        if *depth >= self.max_depth {
            return Err(DrawError::StackOverflow {
                kind,
                max: self.max_depth,
            });
        }
        *depth += 1;

        let persistent_only = self.persist_depth > 0 || kind == ScopeKind::Duration;
        let mut mirrored = [false; 3];
        for category in Category::ALL {
            if persistent_only && category != Category::Persistent {
                continue;
            }
            let i = category.index();
            self.open[i].push(OpenScope {
                start: self.outputs[i].len(),
                wrote: false,
            });
            self.outputs[i].write_bytes(record);
            mirrored[i] = true;
        }
        if kind == ScopeKind::Duration {
            self.persist_depth += 1;
        }
        self.scopes.push(InputScope { kind, mirrored });
        Ok(())
    }

    fn pop(&mut self, kind: ScopeKind, record: &[u8]) -> DrawResult<()> {
        let scope = match self.scopes.pop() {
            Some(scope) if scope.kind == kind => scope,
            _ => return Err(DrawError::StackUnderflow(kind)),
        };
        self.depth[kind_index(kind)] -= 1;
        if kind == ScopeKind::Duration {
            self.persist_depth -= 1;
        }

        for (i, mirrored) in scope.mirrored.into_iter().enumerate() {
            if !mirrored {
                continue;
            }
            let Some(open) = self.open[i].pop() else {
                return Err(DrawError::StackUnderflow(kind));
            };
            if open.wrote {
                self.outputs[i].write_bytes(record);
                if let Some(parent) = self.open[i].last_mut() {
                    parent.wrote = true;
                }
            } else {
                self.outputs[i].truncate(open.start);
            }
        }
        Ok(())
    }

    fn draw(&mut self, category: Category, record: &[u8]) {
        let target = if self.persist_depth > 0 {
            Category::Persistent
        } else {
            category
        };
        let i = target.index();
        self.outputs[i].write_bytes(record);
        if let Some(open) = self.open[i].last_mut() {
            open.wrote = true;
        }
    }

    fn split_one(&mut self, stream: &[u8]) -> DrawResult<()> {
        for record in RecordReader::new(stream) {
            let record = record?;
            let bytes = record.bytes(stream);
            match record.tag.class() {
                TagClass::Push(kind) => self.push(kind, bytes)?,
                TagClass::Pop(kind) => self.pop(kind, bytes)?,
                TagClass::Draw(category) => self.draw(category, bytes),
            }
        }
        if !self.scopes.is_empty() {
            return Err(DrawError::UnbalancedScopes {
                open: self.scopes.len(),
            });
        }
        Ok(())
    }
}

/// Split `inputs` (the writer buffers of one submission) into `outputs`,
/// indexed by [`Category::index`].
///
/// Outputs are appended to. On error all three are cleared.
pub fn split_streams<'a>(
    inputs: impl IntoIterator<Item = &'a [u8]>,
    outputs: &mut [CommandBuffer; 3],
    max_depth: usize,
) -> DrawResult<()> {
    let mut state = SplitState {
        outputs,
        open: Default::default(),
        scopes: Vec::new(),
        depth: [0; 4],
        persist_depth: 0,
        max_depth,
    };
    let mut result = Ok(());
    for input in inputs {
        // Each writer buffer is balanced on its own.
        result = state.split_one(input);
        if result.is_err() {
            break;
        }
    }
    if result.is_err() {
        for output in state.outputs.iter_mut() {
            output.clear();
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::Color;
    use crate::command::{CircleXzData, LineData, PersistData, Tag};
    use glam::Vec3;

    fn tag(buf: &mut CommandBuffer, tag: Tag) {
        buf.write_pod(&(tag as u32));
    }

    fn push_color(buf: &mut CommandBuffer) {
        tag(buf, Tag::PushColor);
        buf.write_pod(&Color::RED);
    }

    fn line(buf: &mut CommandBuffer) {
        tag(buf, Tag::Line);
        buf.write_pod(&LineData {
            a: Vec3::ZERO,
            b: Vec3::X,
        });
    }

    fn circle(buf: &mut CommandBuffer) {
        tag(buf, Tag::CircleXz);
        buf.write_pod(&CircleXzData {
            center: Vec3::ZERO,
            radius: 1.0,
            start_angle: 0.0,
            end_angle: std::f32::consts::TAU,
        });
    }

    fn split(input: &CommandBuffer) -> DrawResult<[CommandBuffer; 3]> {
        let mut outputs: [CommandBuffer; 3] = Default::default();
        split_streams([input.as_bytes()], &mut outputs, 32)?;
        Ok(outputs)
    }

    #[test]
    fn static_only_scope_is_elided_elsewhere() {
        let mut input = CommandBuffer::new();
        push_color(&mut input);
        line(&mut input);
        tag(&mut input, Tag::PopColor);

        let [stat, dynamic, persistent] = split(&input).unwrap();
        assert_eq!(stat.as_bytes(), input.as_bytes());
        assert!(dynamic.is_empty());
        assert!(persistent.is_empty());
    }

    #[test]
    fn mixed_scope_is_mirrored() {
        let mut input = CommandBuffer::new();
        push_color(&mut input);
        line(&mut input);
        circle(&mut input);
        tag(&mut input, Tag::PopColor);

        let [stat, dynamic, persistent] = split(&input).unwrap();
        let tags = |b: &CommandBuffer| -> Vec<Tag> {
            RecordReader::new(b.as_bytes())
                .map(|r| r.unwrap().tag)
                .collect()
        };
        assert_eq!(tags(&stat), vec![Tag::PushColor, Tag::Line, Tag::PopColor]);
        assert_eq!(
            tags(&dynamic),
            vec![Tag::PushColor, Tag::CircleXz, Tag::PopColor]
        );
        assert!(persistent.is_empty());
    }

    #[test]
    fn duration_scope_goes_to_persistent_only() {
        let mut input = CommandBuffer::new();
        push_color(&mut input);
        tag(&mut input, Tag::PushDuration);
        input.write_pod(&PersistData { end_time: 1.0 });
        line(&mut input);
        circle(&mut input);
        tag(&mut input, Tag::PopDuration);
        tag(&mut input, Tag::PopColor);

        let [stat, dynamic, persistent] = split(&input).unwrap();
        assert!(stat.is_empty());
        assert!(dynamic.is_empty());
        assert_eq!(persistent.as_bytes(), input.as_bytes());
    }

    #[test]
    fn empty_scope_yields_nothing() {
        let mut input = CommandBuffer::new();
        push_color(&mut input);
        tag(&mut input, Tag::PopColor);
        let outputs = split(&input).unwrap();
        assert!(outputs.iter().all(CommandBuffer::is_empty));
    }

    #[test]
    fn unmatched_pop_aborts_everything() {
        let mut input = CommandBuffer::new();
        line(&mut input);
        tag(&mut input, Tag::PopColor);
        let mut outputs: [CommandBuffer; 3] = Default::default();
        let err = split_streams([input.as_bytes()], &mut outputs, 32).unwrap_err();
        assert_eq!(err, DrawError::StackUnderflow(ScopeKind::Color));
        assert!(outputs.iter().all(CommandBuffer::is_empty));
    }

    #[test]
    fn mismatched_pop_kind_is_underflow() {
        let mut input = CommandBuffer::new();
        push_color(&mut input);
        line(&mut input);
        tag(&mut input, Tag::PopMatrix);
        assert_eq!(
            split(&input).unwrap_err(),
            DrawError::StackUnderflow(ScopeKind::Matrix)
        );
    }

    #[test]
    fn leftover_push_is_unbalanced() {
        let mut input = CommandBuffer::new();
        push_color(&mut input);
        line(&mut input);
        assert_eq!(
            split(&input).unwrap_err(),
            DrawError::UnbalancedScopes { open: 1 }
        );
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut input = CommandBuffer::new();
        for _ in 0..3 {
            push_color(&mut input);
        }
        let mut outputs: [CommandBuffer; 3] = Default::default();
        let err = split_streams([input.as_bytes()], &mut outputs, 2).unwrap_err();
        assert_eq!(
            err,
            DrawError::StackOverflow {
                kind: ScopeKind::Color,
                max: 2
            }
        );
    }

    #[test]
    fn writers_are_balanced_independently() {
        let mut first = CommandBuffer::new();
        push_color(&mut first);
        let mut second = CommandBuffer::new();
        line(&mut second);
        tag(&mut second, Tag::PopColor);

        let mut outputs: [CommandBuffer; 3] = Default::default();
        assert!(split_streams([first.as_bytes(), second.as_bytes()], &mut outputs, 32).is_err());
    }
}
