//! Snapshot tests for operator-facing error messages and reports.

use std::io;
use std::path::PathBuf;

use fwutil_image::{FormatError, IdentityMismatch};
use fwutil_update::prelude::*;
use insta::assert_snapshot;

mod update_error_snapshots {
    use super::*;

    #[test]
    fn test_hardware_timeout() {
        let err = UpdateError::HardwareTimeout {
            state: UpdateState::PoweringDown,
            operation: "graceful power off",
        };
        assert_snapshot!(
            err.to_string(),
            @"PoweringDown: graceful power off did not complete within its retry budget"
        );
    }

    #[test]
    fn test_invalid_image() {
        let err = UpdateError::InvalidImage {
            path: PathBuf::from("/tmp/image-bmc"),
            layouts: 2,
        };
        assert_snapshot!(
            err.to_string(),
            @"Image /tmp/image-bmc matches none of the 2 configured partition layouts"
        );
    }

    #[test]
    fn test_platform_command() {
        let err = UpdateError::Platform {
            state: UpdateState::Writing,
            source: PlatformError::Command {
                command: "flashcp -v /tmp/bios.bin /dev/mtd5".to_owned(),
                detail: "exit status 1".to_owned(),
            },
        };
        assert_snapshot!(
            err.to_string(),
            @"Writing: 'flashcp -v /tmp/bios.bin /dev/mtd5' failed: exit status 1"
        );
    }

    #[test]
    fn test_transport_no_response() {
        let err = UpdateError::Transport {
            state: UpdateState::Writing,
            source: TransportError::NoResponse {
                bus: 0,
                endpoint: 10,
            },
        };
        assert_snapshot!(err.to_string(), @"Writing: No response from bus 0 endpoint 10");
    }

    #[test]
    fn test_transport_rejected() {
        let err = TransportError::Rejected(0x82);
        assert_snapshot!(
            err.to_string(),
            @"Endpoint rejected request with completion code 0x82"
        );
    }

    #[test]
    fn test_io() {
        let err = UpdateError::Io {
            state: UpdateState::Validating,
            path: PathBuf::from("/tmp/missing.bin"),
            source: io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        };
        assert_snapshot!(
            err.to_string(),
            @"Validating: failed to access /tmp/missing.bin: No such file or directory"
        );
    }

    #[test]
    fn test_stopped() {
        let err = UpdateError::Stopped {
            state: UpdateState::EnteringServiceMode,
        };
        assert_snapshot!(err.to_string(), @"Stop requested before EnteringServiceMode");
    }

    #[test]
    fn test_not_supported() {
        let err = UpdateError::NotSupported {
            component: "slot1/1ou/vr".to_owned(),
            operation: "dump",
        };
        assert_snapshot!(err.to_string(), @"slot1/1ou/vr: dump is not supported");
    }

    #[test]
    fn test_identity_passes_through() {
        let err = UpdateError::from(FormatError::Identity(IdentityMismatch::Board {
            expected: 0x03,
            found: 0x11,
        }));
        assert_snapshot!(
            err.to_string(),
            @"Board id mismatch: image is for board 0x11, target is 0x03"
        );
        assert_eq!(err.reason(), FailureReason::Identity);
    }
}

mod state_snapshots {
    use super::*;

    #[test]
    fn test_failed_state_names_reason() {
        assert_snapshot!(
            UpdateState::Failed(FailureReason::HardwareTimeout).to_string(),
            @"Failed(hardware_timeout)"
        );
    }

    #[test]
    fn test_component_display() {
        let id = ComponentId::new("slot1", "cpld").on_board("2ou");
        assert_snapshot!(id.to_string(), @"slot1/2ou/cpld");
    }
}
