/*
    presence_properties.rs - Election properties over random streams

    Any two observers fed the same ordered presence stream agree on the
    host, and the host is always the earliest joiner still present.
*/

use proptest::prelude::*;
use varsync_core::{Participant, PresenceTracker};

#[derive(Debug, Clone)]
enum Op {
    Join(u8),
    Leave(u8),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![(0u8..8).prop_map(Op::Join), (0u8..8).prop_map(Op::Leave)]
}

fn participant(id: u8) -> Participant {
    Participant::new(format!("p{}", id), format!("Player {}", id)).with_session_id(format!("s{}", id))
}

proptest! {
    #[test]
    fn prop_observers_agree_on_host(ops in prop::collection::vec(op(), 1..60)) {
        let mut first = PresenceTracker::new("observer-1");
        let mut second = PresenceTracker::new("observer-2");
        let mut present: Vec<u8> = Vec::new();

        for op in ops {
            let (joins, leaves) = match op {
                Op::Join(id) if !present.contains(&id) => {
                    present.push(id);
                    (vec![participant(id)], vec![])
                }
                Op::Leave(id) if present.contains(&id) => {
                    present.retain(|p| *p != id);
                    (vec![], vec![participant(id)])
                }
                _ => continue,
            };

            let a = first.handle_presence_event(&joins, &leaves).unwrap();
            let b = second.handle_presence_event(&joins, &leaves).unwrap();
            prop_assert_eq!(a, b);
            prop_assert_eq!(first.host_id(), second.host_id());

            if first.has_ended() {
                prop_assert!(second.has_ended());
                break;
            }

            let earliest = format!("p{}", present[0]);
            prop_assert_eq!(first.host_id(), Some(earliest.as_str()));
        }
    }

    #[test]
    fn prop_failed_events_change_nothing(
        seed in prop::collection::vec(0u8..8, 1..8),
        ops in prop::collection::vec(op(), 1..40),
    ) {
        let mut tracker = PresenceTracker::new("observer");
        let mut seeded: Vec<Participant> = Vec::new();
        for id in seed {
            if !seeded.iter().any(|p| p.user_id == format!("p{}", id)) {
                seeded.push(participant(id));
            }
        }
        tracker.handle_presence_event(&seeded, &[]).unwrap();

        for op in ops {
            let order = tracker.join_order().to_vec();
            let host = tracker.host_id().map(str::to_string);

            // Naming someone twice in one event is always invalid
            let result = match op {
                Op::Join(id) => tracker.handle_presence_event(&[participant(id), participant(id)], &[]),
                Op::Leave(id) => tracker.handle_presence_event(&[], &[participant(id), participant(id)]),
            };
            if tracker.has_ended() {
                break;
            }
            prop_assert!(result.is_err());
            prop_assert_eq!(tracker.join_order(), order.as_slice());
            prop_assert_eq!(tracker.host_id().map(str::to_string), host);
        }
    }

    #[test]
    fn prop_duplicate_join_is_rejected(id in 0u8..8) {
        let mut tracker = PresenceTracker::new("observer");
        tracker.handle_presence_event(&[participant(id)], &[]).unwrap();
        prop_assert!(tracker.handle_presence_event(&[participant(id)], &[]).is_err());
    }
}
