//! Per-invocation session state.
//!
//! Everything the original tool kept in global state is carried here as an
//! explicit value: the confirmation callback, the force/auto-confirm flag,
//! a cancellation token, a scratch workspace, and the helper-capability
//! memo map. One session covers one package-edit invocation; the scratch
//! directory is removed when the session drops, on every exit path.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{info, warn};
use tempfile::TempDir;

use crate::error::{Error, Result};
use crate::helpers::Helper;

/// Callback invoked for warnings that require user confirmation.
/// Returns true to proceed.
pub type ConfirmCallback = Box<dyn Fn(&str) -> bool>;

/// A cancellation token checked at coarse operation boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Safe to call from another thread.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Scratch directory owned by one edit session.
///
/// The directory and its contents are removed when this value drops,
/// including on error paths.
#[derive(Debug)]
pub struct Workspace {
    dir: TempDir,
}

impl Workspace {
    pub fn new() -> Result<Self> {
        let dir = TempDir::with_prefix("ovfedit-")
            .map_err(Error::io_simple)?;
        info!("Using working directory {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// State threaded through all edit operations.
pub struct Session {
    /// Auto-confirm all warnings (`--force`).
    pub force: bool,
    confirm: Option<ConfirmCallback>,
    cancel: CancelToken,
    workspace: Workspace,
    helper_cache: RefCell<HashMap<String, Option<Helper>>>,
}

impl Session {
    pub fn new() -> Result<Self> {
        Ok(Self {
            force: false,
            confirm: None,
            cancel: CancelToken::new(),
            workspace: Workspace::new()?,
            helper_cache: RefCell::new(HashMap::new()),
        })
    }

    /// Set the auto-confirm flag.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Install the confirmation callback used for gated warnings.
    pub fn with_confirm(mut self, callback: ConfirmCallback) -> Self {
        self.confirm = Some(callback);
        self
    }

    /// Install a cancellation token shared with the caller.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// The session's scratch directory.
    pub fn working_dir(&self) -> &Path {
        self.workspace.path()
    }

    /// Ask the user to confirm a warning. With `force` set, the warning is
    /// logged and auto-confirmed. Without a callback, the answer is no.
    pub fn confirm(&self, message: &str) -> bool {
        if self.force {
            warn!("{} (auto-confirmed by --force)", message);
            return true;
        }
        match &self.confirm {
            Some(callback) => callback(message),
            None => false,
        }
    }

    /// Like [`confirm`](Self::confirm) but declining is an error that
    /// aborts the operation.
    pub fn confirm_or_fail(&self, message: &str) -> Result<()> {
        if self.confirm(message) {
            Ok(())
        } else {
            Err(Error::cancelled(format!("declined: {}", message)))
        }
    }

    /// Check the cancellation token; called at coarse boundaries (before
    /// each member copy, after each descriptor mutation batch).
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::cancelled("cancellation requested"))
        } else {
            Ok(())
        }
    }

    /// Look up a helper capability by name, memoizing the result.
    pub fn helper(
        &self,
        name: &str,
        registry: &dyn crate::helpers::HelperRegistry,
    ) -> Option<Helper> {
        self.helper_cache
            .borrow_mut()
            .entry(name.to_string())
            .or_insert_with(|| registry.capability(name))
            .clone()
    }
}
