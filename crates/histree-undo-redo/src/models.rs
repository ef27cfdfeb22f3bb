//! Data models and validators

use crate::change::{CollectionAction, ContainerEvent};
use crate::error::{Result, UndoRedoError};

/// Largest index a container can hold
const MAX_POSITION: usize = isize::MAX as usize;

/// Whether a run of `count` items starting at `start` lies within
/// addressable positions
pub(crate) fn span_in_range(start: Option<usize>, count: usize) -> bool {
    start.map_or(true, |start| {
        start
            .checked_add(count)
            .map_or(false, |end| end <= MAX_POSITION)
    })
}

/// Validates container events before they are recorded
pub struct ChangeValidator;

impl ChangeValidator {
    /// Validate an event raised by an order-preserving container
    pub fn validate_sequence_event<V>(event: &ContainerEvent<V>) -> Result<()> {
        Self::validate_common(event)?;
        if event.action == CollectionAction::Move
            && (event.old_start.is_none() || event.new_start.is_none())
        {
            return Err(UndoRedoError::validation_error(
                "move requires known start positions",
            ));
        }
        Ok(())
    }

    /// Validate an event raised by an unordered container
    pub fn validate_set_event<V>(event: &ContainerEvent<V>) -> Result<()> {
        Self::validate_common(event)
    }

    fn validate_common<V>(event: &ContainerEvent<V>) -> Result<()> {
        if !span_in_range(event.old_start, event.old_items.len())
            || !span_in_range(event.new_start, event.new_items.len())
        {
            return Err(UndoRedoError::validation_error(format!(
                "start positions {:?}/{:?} are out of range",
                event.old_start, event.new_start
            )));
        }
        match event.action {
            // Clears must arrive through the clearing hook with their contents
            CollectionAction::Reset => Err(UndoRedoError::unsupported(
                "reset without prior contents cannot be recorded",
            )),
            CollectionAction::Add if event.new_items.is_empty() => {
                Err(UndoRedoError::validation_error("add carries no items"))
            }
            CollectionAction::Remove if event.old_items.is_empty() => {
                Err(UndoRedoError::validation_error("remove carries no items"))
            }
            CollectionAction::Move if event.old_items.len() != event.new_items.len() => {
                Err(UndoRedoError::validation_error(format!(
                    "move of {} items lands {} items",
                    event.old_items.len(),
                    event.new_items.len()
                )))
            }
            _ => Ok(()),
        }
    }
}
