//! Drag-to-reorder for sections and for photos inside image blocks.
//!
//! The controller is a small state machine fed with pointer events. It never
//! touches the model itself: a completed gesture yields a [`ReorderCommand`]
//! which the composer applies through [`ReorderCommand::apply`].
//!
//! Mouse and touch share the same path. A gesture arms after the hold
//! delay, or (mouse only) as soon as the pointer travels past the drag
//! threshold. Touch travel past the threshold before arming is a scroll and
//! cancels the gesture.

use std::time::Duration;

use web_time::Instant;

use crate::error::ModelError;
use crate::model::{ModelChange, SectionModel};
use crate::types::{ImageListRef, SectionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Mouse,
    Touch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    fn exceeds(&self, origin: Point, threshold: i32) -> bool {
        (self.x - origin.x).abs() > threshold || (self.y - origin.y).abs() > threshold
    }
}

/// What is being dragged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragSource {
    Section(SectionId),
    Image { list: ImageListRef, index: usize },
}

/// What the pointer is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropTarget {
    Section(SectionId),
    /// A photo inside a list
    Image { list: ImageListRef, index: usize },
    /// Empty space of a list (also how empty lists accept drops)
    ImageList(ImageListRef),
}

/// Ordering mutation produced by a completed gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReorderCommand {
    MoveSection {
        id: SectionId,
        to_index: usize,
    },
    MoveImageWithin {
        list: ImageListRef,
        from: usize,
        to: usize,
    },
    MoveImageAcross {
        from: ImageListRef,
        index: usize,
        to: ImageListRef,
    },
}

impl ReorderCommand {
    pub fn apply(self, model: &mut SectionModel) -> Result<ModelChange, ModelError> {
        match self {
            ReorderCommand::MoveSection { id, to_index } => model.move_section(id, to_index),
            ReorderCommand::MoveImageWithin { list, from, to } => {
                model.move_image_within(list, from, to)
            }
            ReorderCommand::MoveImageAcross { from, index, to } => {
                model.move_image_across(from, index, to)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Gesture {
    #[default]
    Idle,
    /// Pointer is down but the drag has not started
    Pending {
        source: DragSource,
        kind: InputKind,
        origin: Point,
        since: Instant,
    },
    Armed {
        source: DragSource,
        target: Option<DropTarget>,
    },
}

#[derive(Debug, Clone)]
pub struct ReorderController {
    hold_delay: Duration,
    threshold_px: i32,
    gesture: Gesture,
}

impl ReorderController {
    pub fn new(hold_delay: Duration, threshold_px: i32) -> Self {
        Self {
            hold_delay,
            threshold_px,
            gesture: Gesture::Idle,
        }
    }

    pub fn is_dragging(&self) -> bool {
        matches!(self.gesture, Gesture::Armed { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.gesture, Gesture::Pending { .. })
    }

    /// Source of the current gesture, armed or not.
    pub fn source(&self) -> Option<DragSource> {
        match self.gesture {
            Gesture::Idle => None,
            Gesture::Pending { source, .. } | Gesture::Armed { source, .. } => Some(source),
        }
    }

    /// Candidate drop target while armed.
    pub fn target(&self) -> Option<DropTarget> {
        match self.gesture {
            Gesture::Armed { target, .. } => target,
            _ => None,
        }
    }

    pub fn pointer_down(&mut self, source: DragSource, kind: InputKind, at: Point, now: Instant) {
        self.gesture = Gesture::Pending {
            source,
            kind,
            origin: at,
            since: now,
        };
    }

    /// Pointer moved. `hit` is whatever lies under the pointer.
    ///
    /// Returns true while a drag is armed.
    pub fn pointer_move(&mut self, at: Point, hit: Option<DropTarget>, now: Instant) -> bool {
        match self.gesture {
            Gesture::Idle => false,
            Gesture::Pending {
                source,
                kind,
                origin,
                since,
            } => {
                let held = now.saturating_duration_since(since) >= self.hold_delay;
                let travelled = at.exceeds(origin, self.threshold_px);
                match (kind, held, travelled) {
                    (_, true, _) | (InputKind::Mouse, false, true) => {
                        tracing::debug!(?source, ?kind, "drag armed");
                        self.gesture = Gesture::Armed {
                            source,
                            target: hit,
                        };
                        true
                    }
                    (InputKind::Touch, false, true) => {
                        tracing::debug!(?source, "touch moved before hold, treating as scroll");
                        self.gesture = Gesture::Idle;
                        false
                    }
                    (_, false, false) => false,
                }
            }
            Gesture::Armed { source, .. } => {
                self.gesture = Gesture::Armed {
                    source,
                    target: hit,
                };
                true
            }
        }
    }

    /// Timer tick; arms a pending gesture once the hold delay has elapsed.
    pub fn tick(&mut self, now: Instant) -> bool {
        if let Gesture::Pending { source, since, .. } = self.gesture {
            if now.saturating_duration_since(since) >= self.hold_delay {
                tracing::debug!(?source, "drag armed by hold");
                self.gesture = Gesture::Armed {
                    source,
                    target: None,
                };
            }
        }
        self.is_dragging()
    }

    pub fn cancel(&mut self) {
        self.gesture = Gesture::Idle;
    }

    /// Pointer released. Returns the command to apply, if the gesture was
    /// armed and ended over a compatible target.
    pub fn pointer_up(&mut self, now: Instant, model: &SectionModel) -> Option<ReorderCommand> {
        self.tick(now);
        let gesture = std::mem::take(&mut self.gesture);
        let Gesture::Armed { source, target } = gesture else {
            return None;
        };
        let target = target?;
        let command = resolve(source, target, model);
        if command.is_none() {
            tracing::debug!(?source, ?target, "drop rejected");
        }
        command
    }
}

fn resolve(source: DragSource, target: DropTarget, model: &SectionModel) -> Option<ReorderCommand> {
    match (source, target) {
        (DragSource::Section(id), DropTarget::Section(over)) => {
            let from = model.index_of(id)?;
            let to_index = model.index_of(over)?;
            (from != to_index).then_some(ReorderCommand::MoveSection { id, to_index })
        }
        (DragSource::Image { list, index }, DropTarget::Image { list: over, index: to }) => {
            if list == over {
                (index != to).then_some(ReorderCommand::MoveImageWithin {
                    list,
                    from: index,
                    to,
                })
            } else {
                Some(ReorderCommand::MoveImageAcross {
                    from: list,
                    index,
                    to: over,
                })
            }
        }
        (DragSource::Image { list, index }, DropTarget::ImageList(over)) => {
            if list == over {
                let last = model.photos(list).ok()?.len().checked_sub(1)?;
                (index != last).then_some(ReorderCommand::MoveImageWithin {
                    list,
                    from: index,
                    to: last,
                })
            } else {
                Some(ReorderCommand::MoveImageAcross {
                    from: list,
                    index,
                    to: over,
                })
            }
        }
        // cross-scope
        (DragSource::Section(_), DropTarget::Image { .. } | DropTarget::ImageList(_))
        | (DragSource::Image { .. }, DropTarget::Section(_)) => None,
    }
}
