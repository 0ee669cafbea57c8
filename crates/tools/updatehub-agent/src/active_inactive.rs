use crate::backends::ActiveInactiveBackend;
use crate::error::ControllerError;
use crate::metadata::UpdateMetadata;

/// Index of the object list to download and install.
///
/// Single-slot updates always use the first list. Updates with two lists target the
/// inactive slot, i.e., the list which is not currently active.
pub fn active_inactive_index(
    metadata: &UpdateMetadata,
    backend: &dyn ActiveInactiveBackend,
) -> Result<usize, ControllerError> {
    match metadata.objects.len() {
        1 => Ok(0),
        2 => match backend.active().map_err(ControllerError::ActiveInactive)? {
            0 => Ok(1),
            1 => Ok(0),
            other => Err(ControllerError::InvalidActiveSlot(other)),
        },
        lists => Err(ControllerError::InvalidObjectLists(lists)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::BackendError;
    use crate::metadata::tests::metadata_json;

    #[derive(Default)]
    struct Slot {
        active: u8,
        queried: AtomicUsize,
    }

    impl ActiveInactiveBackend for Slot {
        fn active(&self) -> Result<u8, BackendError> {
            self.queried.fetch_add(1, Ordering::SeqCst);
            Ok(self.active)
        }

        fn set_active(&self, _: u8) -> Result<(), BackendError> {
            unreachable!()
        }
    }

    fn metadata(lists: &[&[&str]]) -> UpdateMetadata {
        UpdateMetadata::from_slice(metadata_json(lists).as_bytes()).unwrap()
    }

    #[test]
    fn test_single_list_never_queries_backend() {
        let slot = Slot::default();
        assert_eq!(active_inactive_index(&metadata(&[&["a"]]), &slot).unwrap(), 0);
        assert_eq!(slot.queried.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_two_lists_target_inactive_slot() {
        let update = metadata(&[&["a"], &["b"]]);
        for (active, expected) in [(0, 1), (1, 0)] {
            let slot = Slot {
                active,
                ..Default::default()
            };
            assert_eq!(active_inactive_index(&update, &slot).unwrap(), expected);
        }
        let slot = Slot {
            active: 2,
            ..Default::default()
        };
        assert!(matches!(
            active_inactive_index(&update, &slot),
            Err(ControllerError::InvalidActiveSlot(2))
        ));
    }

    #[test]
    fn test_invalid_number_of_lists() {
        let slot = Slot::default();
        assert!(matches!(
            active_inactive_index(&metadata(&[]), &slot),
            Err(ControllerError::InvalidObjectLists(0))
        ));
        assert!(matches!(
            active_inactive_index(&metadata(&[&["a"], &["b"], &["c"]]), &slot),
            Err(ControllerError::InvalidObjectLists(3))
        ));
    }
}
