//! Scoped registry mode and compatibility changes
//!
//! Switching a subject into IMPORT or READWRITE, or relaxing its
//! compatibility to NONE, is transient: the previous value must come back no
//! matter how the surrounding work ends. [`ModeScope`] and
//! [`CompatibilityScope`] hold the previous value and write it back when they
//! are dropped, including during an early `?` return or a panic.
//!
//! A failed restore never aborts the caller. It is logged and kept as a
//! [`StateWarning`] so the final report can list what was left behind.

use std::cell::RefCell;
use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::client::{ClientResult, RegistryClient};
use crate::error::RegistryError;
use crate::schema::{Compatibility, CompatibilitySetting, Mode};

/// Scope label used for the registry-wide mode
pub const GLOBAL_SCOPE: &str = "(global)";

/// Which piece of registry state a warning is about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Setting {
    Mode,
    Compatibility,
}

/// Step of a scoped change that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Read,
    Switch,
    Restore,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Read => "read",
            Phase::Switch => "switch",
            Phase::Restore => "restore",
        })
    }
}

/// Registry state that could not be read, changed or put back
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateWarning {
    /// Subject name, or [`GLOBAL_SCOPE`]
    pub scope: String,
    pub setting: Setting,
    pub phase: Phase,
    /// Value that was being read, applied or restored
    pub intended: String,
    pub cause: String,
}

impl fmt::Display for StateWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let setting = match self.setting {
            Setting::Mode => "mode",
            Setting::Compatibility => "compatibility",
        };
        write!(
            f,
            "{}: could not {} {} ({}): {}",
            self.scope, self.phase, setting, self.intended, self.cause
        )
    }
}

/// A scoped change that could not be established
#[derive(Debug, Clone, Error)]
#[error("could not {phase} mode of {scope}: {error}")]
pub struct ScopeError {
    pub scope: String,
    pub phase: Phase,
    #[source]
    pub error: RegistryError,
}

impl From<ScopeError> for RegistryError {
    fn from(e: ScopeError) -> Self {
        e.error
    }
}

/// Mode and compatibility access for one registry, with scoped changes
pub struct ModeManager<'c, C: RegistryClient + ?Sized> {
    client: &'c C,
    warnings: RefCell<Vec<StateWarning>>,
}

impl<'c, C: RegistryClient + ?Sized> ModeManager<'c, C> {
    pub fn new(client: &'c C) -> Self {
        Self {
            client,
            warnings: RefCell::new(Vec::new()),
        }
    }

    pub fn client(&self) -> &'c C {
        self.client
    }

    pub fn get_mode(&self, subject: &str) -> ClientResult<Mode> {
        self.client.get_mode(subject)
    }

    pub fn set_mode(&self, subject: &str, mode: Mode) -> ClientResult<()> {
        self.client.set_mode(subject, mode)
    }

    pub fn get_global_mode(&self) -> ClientResult<Mode> {
        self.client.get_global_mode()
    }

    pub fn set_global_mode(&self, mode: Mode) -> ClientResult<()> {
        self.client.set_global_mode(mode)
    }

    pub fn get_compatibility(&self, subject: &str) -> ClientResult<CompatibilitySetting> {
        self.client.get_compatibility(subject)
    }

    pub fn set_compatibility(&self, subject: &str, level: Compatibility) -> ClientResult<()> {
        self.client.set_compatibility(subject, level)
    }

    pub fn delete_compatibility(&self, subject: &str) -> ClientResult<()> {
        self.client.delete_compatibility(subject)
    }

    /// Put `subject` in `desired` mode until the returned scope is dropped.
    ///
    /// Nothing is written when the subject is already in that mode. A subject
    /// that only inherited its mode gets its override removed on restore
    /// rather than pinned to the inherited value.
    pub fn scoped_mode(&self, subject: &str, desired: Mode) -> Result<ModeScope<'_, 'c, C>, ScopeError> {
        let fail = |phase, error| ScopeError {
            scope: subject.to_string(),
            phase,
            error,
        };
        let current = self.client.get_mode(subject).map_err(|e| fail(Phase::Read, e))?;
        if current == desired {
            debug!(subject, mode = %desired, "mode already set");
            return Ok(ModeScope::unchanged(self, Some(subject), current));
        }

        // An unreadable override is treated as explicit so the old value is written back
        let inherited = matches!(self.client.get_subject_mode(subject), Ok(None));
        self.client
            .set_mode(subject, desired)
            .map_err(|e| fail(Phase::Switch, e))?;
        info!(subject, from = %current, to = %desired, "Switched subject mode");

        Ok(ModeScope {
            manager: self,
            subject: Some(subject.to_string()),
            previous: current,
            inherited,
            changed: true,
        })
    }

    /// Put the whole registry in `desired` mode until the returned scope is dropped
    pub fn scoped_global_mode(&self, desired: Mode) -> Result<ModeScope<'_, 'c, C>, ScopeError> {
        let fail = |phase, error| ScopeError {
            scope: GLOBAL_SCOPE.to_string(),
            phase,
            error,
        };
        let current = self.client.get_global_mode().map_err(|e| fail(Phase::Read, e))?;
        if current == desired {
            return Ok(ModeScope::unchanged(self, None, current));
        }
        self.client
            .set_global_mode(desired)
            .map_err(|e| fail(Phase::Switch, e))?;
        info!(from = %current, to = %desired, "Switched global mode");

        Ok(ModeScope {
            manager: self,
            subject: None,
            previous: current,
            inherited: false,
            changed: true,
        })
    }

    /// Run `f` with `subject` in `desired` mode, restoring the mode afterwards
    pub fn with_mode<T>(
        &self,
        subject: &str,
        desired: Mode,
        f: impl FnOnce() -> ClientResult<T>,
    ) -> ClientResult<T> {
        let _scope = self.scoped_mode(subject, desired)?;
        f()
    }

    /// Set `subject` compatibility to `desired` until the returned scope is dropped.
    ///
    /// An unreadable prior value is recorded as a warning and the change still
    /// goes ahead; such a scope cannot restore and records a second warning
    /// when dropped. Only a failed write is returned as an error.
    pub fn scoped_compatibility(
        &self,
        subject: &str,
        desired: Compatibility,
    ) -> ClientResult<CompatibilityScope<'_, 'c, C>> {
        let previous = match self.client.get_compatibility(subject) {
            Ok(setting) => Some(setting),
            Err(e) => {
                self.warn(subject, Setting::Compatibility, Phase::Read, "current value", &e);
                None
            }
        };

        if previous == Some(CompatibilitySetting::Explicit(desired)) {
            return Ok(CompatibilityScope {
                manager: self,
                subject: subject.to_string(),
                previous,
                changed: false,
            });
        }

        self.client.set_compatibility(subject, desired)?;
        info!(
            subject,
            from = %previous.map_or_else(|| "unknown".to_string(), |p| p.to_string()),
            to = %desired,
            "Switched subject compatibility"
        );

        Ok(CompatibilityScope {
            manager: self,
            subject: subject.to_string(),
            previous,
            changed: true,
        })
    }

    /// Log and keep a warning for the report
    pub fn warn(&self, scope: &str, setting: Setting, phase: Phase, intended: &str, cause: &RegistryError) {
        let warning = StateWarning {
            scope: scope.to_string(),
            setting,
            phase,
            intended: intended.to_string(),
            cause: cause.to_string(),
        };
        warn!("{}", warning);
        self.warnings.borrow_mut().push(warning);
    }

    /// Warning for a scope that could not be established
    pub fn warn_scope(&self, setting: Setting, intended: &str, error: &ScopeError) {
        self.warn(&error.scope, setting, error.phase, intended, &error.error);
    }

    /// Drain the warnings recorded so far
    pub fn take_warnings(&self) -> Vec<StateWarning> {
        std::mem::take(&mut *self.warnings.borrow_mut())
    }
}

/// Restores a subject or global mode on drop
pub struct ModeScope<'m, 'c, C: RegistryClient + ?Sized> {
    manager: &'m ModeManager<'c, C>,
    /// `None` for the global mode
    subject: Option<String>,
    previous: Mode,
    inherited: bool,
    changed: bool,
}

impl<'m, 'c, C: RegistryClient + ?Sized> ModeScope<'m, 'c, C> {
    fn unchanged(manager: &'m ModeManager<'c, C>, subject: Option<&str>, current: Mode) -> Self {
        Self {
            manager,
            subject: subject.map(String::from),
            previous: current,
            inherited: false,
            changed: false,
        }
    }

    /// Mode in effect before the scope was entered
    pub fn previous(&self) -> Mode {
        self.previous
    }

    /// Whether entering the scope wrote anything
    pub fn changed(&self) -> bool {
        self.changed
    }
}

impl<C: RegistryClient + ?Sized> Drop for ModeScope<'_, '_, C> {
    fn drop(&mut self) {
        if !self.changed {
            return;
        }
        let client = self.manager.client;
        let (scope, result) = match &self.subject {
            Some(subject) if self.inherited => (subject.as_str(), client.delete_mode(subject)),
            Some(subject) => (subject.as_str(), client.set_mode(subject, self.previous)),
            None => (GLOBAL_SCOPE, client.set_global_mode(self.previous)),
        };
        match result {
            Ok(()) => info!(scope, mode = %self.previous, "Restored mode"),
            Err(e) => self
                .manager
                .warn(scope, Setting::Mode, Phase::Restore, self.previous.as_str(), &e),
        }
    }
}

/// Restores a subject's compatibility on drop
pub struct CompatibilityScope<'m, 'c, C: RegistryClient + ?Sized> {
    manager: &'m ModeManager<'c, C>,
    subject: String,
    /// `None` when the value could not be read
    previous: Option<CompatibilitySetting>,
    changed: bool,
}

impl<C: RegistryClient + ?Sized> CompatibilityScope<'_, '_, C> {
    pub fn previous(&self) -> Option<CompatibilitySetting> {
        self.previous
    }
}

impl<C: RegistryClient + ?Sized> Drop for CompatibilityScope<'_, '_, C> {
    fn drop(&mut self) {
        if !self.changed {
            return;
        }
        let client = self.manager.client;
        let result = match self.previous {
            Some(CompatibilitySetting::Explicit(level)) => client.set_compatibility(&self.subject, level),
            Some(CompatibilitySetting::InheritsGlobal) => match client.delete_compatibility(&self.subject) {
                Err(e) if e.is_not_found() => Ok(()),
                other => other,
            },
            None => Err(RegistryError::InvalidResponse(
                "previous compatibility is unknown".to_string(),
            )),
        };
        let intended = self
            .previous
            .map_or_else(|| "unknown".to_string(), |p| p.to_string());
        match result {
            Ok(()) => info!(subject = %self.subject, compatibility = %intended, "Restored compatibility"),
            Err(e) => self
                .manager
                .warn(&self.subject, Setting::Compatibility, Phase::Restore, &intended, &e),
        }
    }
}
