//! Property-based tests for chunking and update sequencing

mod common;

use std::sync::Arc;

use common::*;
use fwutil_update::prelude::*;
use proptest::prelude::*;

fn arb_faults() -> impl Strategy<Value = Faults> {
    (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(
        |(ignores_shutdown, ignores_power_off, recovery_fails, flash_fails)| Faults {
            ignores_shutdown,
            ignores_power_off,
            recovery_fails,
            flash_fails,
            never_boots: false,
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_chunks_tile_the_image(total in 0usize..(3 * BIC_BLOCK_SIZE)) {
        let mut expected_offset = 0;
        let mut lasts = 0;
        for span in chunk_plan(total) {
            prop_assert_eq!(span.offset, expected_offset);
            prop_assert!(span.len > 0 && span.len <= BIC_MAX_CHUNK);
            let first_block = span.offset / BIC_BLOCK_SIZE;
            let last_block = (span.offset + span.len - 1) / BIC_BLOCK_SIZE;
            prop_assert_eq!(first_block, last_block, "chunk crosses a block boundary");
            prop_assert_eq!(span.last, span.offset + span.len == total);
            if span.last {
                lasts += 1;
            }
            expected_offset += span.len;
        }
        prop_assert_eq!(expected_offset, total);
        prop_assert_eq!(lasts, usize::from(total > 0));
    }

    #[test]
    fn prop_poll_never_exceeds_budget(attempts in 0u32..20, succeed_at in 0u32..30) {
        let policy = RetryPolicy::new(attempts, std::time::Duration::ZERO);
        let mut calls = 0u32;
        let done = policy.poll(|| {
            calls += 1;
            Ok::<_, std::io::Error>(calls > succeed_at)
        });
        prop_assert!(calls <= attempts.max(1));
        prop_assert_eq!(done, succeed_at < attempts.max(1));
    }

    #[test]
    fn prop_bios_run_always_leaves_host_powered(faults in arb_faults(), force in any::<bool>()) {
        let platform = Arc::new(MockPlatform::new(faults));
        let image = write_temp(b"bios").map_err(|e| TestCaseError::fail(e.to_string()))?;
        let component = FlashComponent::new(
            ComponentId::new("slot1", "bios"),
            ComponentKind::Bios,
            instant(Family::Bios),
            MtdWriter::new(Arc::clone(&platform) as Arc<dyn PlatformControl>, "pnor"),
            Arc::clone(&platform) as Arc<dyn PlatformControl>,
        );

        let report = if force {
            component.force_update(image.path())
        } else {
            component.update(image.path())
        };

        prop_assert_eq!(platform.power(), PowerState::On);
        let states = report.states();
        prop_assert_eq!(states.first(), Some(&UpdateState::Idle));
        prop_assert_eq!(states.iter().filter(|s| s.is_terminal()).count(), 1);
        prop_assert!(report.final_state().is_terminal());
        match report.error() {
            Some(error) => {
                prop_assert_eq!(report.final_state(), UpdateState::Failed(error.reason()));
            }
            None => prop_assert_eq!(report.final_state(), UpdateState::Done),
        }
        let flashed = platform.calls().iter().any(|c| matches!(c, Call::Flash(_)));
        prop_assert_eq!(flashed, report.visited(UpdateState::Writing));
    }
}
