use crate::CoreError;
use saml2pkg_store::InstallState;

/// Check a step of the install state machine.
///
/// `Pending → Downloading → Staging → Swapping → Completed`; every
/// non-terminal state may fail; only a failed install can be rolled back.
pub fn validate_transition(from: InstallState, to: InstallState) -> Result<(), CoreError> {
    let valid = matches!(
        (from, to),
        (InstallState::Pending, InstallState::Downloading)
            | (InstallState::Downloading, InstallState::Staging)
            | (InstallState::Staging, InstallState::Swapping)
            | (InstallState::Swapping, InstallState::Completed)
            | (
                InstallState::Pending
                    | InstallState::Downloading
                    | InstallState::Staging
                    | InstallState::Swapping,
                InstallState::Failed
            )
            | (InstallState::Failed, InstallState::RolledBack)
    );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_path_is_valid() {
        assert!(validate_transition(InstallState::Pending, InstallState::Downloading).is_ok());
        assert!(validate_transition(InstallState::Downloading, InstallState::Staging).is_ok());
        assert!(validate_transition(InstallState::Staging, InstallState::Swapping).is_ok());
        assert!(validate_transition(InstallState::Swapping, InstallState::Completed).is_ok());
    }

    #[test]
    fn any_live_state_may_fail() {
        for from in [
            InstallState::Pending,
            InstallState::Downloading,
            InstallState::Staging,
            InstallState::Swapping,
        ] {
            assert!(validate_transition(from, InstallState::Failed).is_ok());
        }
        assert!(validate_transition(InstallState::Failed, InstallState::RolledBack).is_ok());
    }

    #[test]
    fn invalid_transitions() {
        assert!(validate_transition(InstallState::Pending, InstallState::Swapping).is_err());
        assert!(validate_transition(InstallState::Staging, InstallState::Completed).is_err());
        assert!(validate_transition(InstallState::Completed, InstallState::Failed).is_err());
        assert!(validate_transition(InstallState::Swapping, InstallState::RolledBack).is_err());
        assert!(validate_transition(InstallState::RolledBack, InstallState::Pending).is_err());
        assert!(validate_transition(InstallState::Completed, InstallState::RolledBack).is_err());
    }

    #[test]
    fn invalid_transition_names_states() {
        let err = validate_transition(InstallState::Completed, InstallState::Failed).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid install transition: completed -> failed"
        );
    }
}
