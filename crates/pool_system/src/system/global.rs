//! Process-wide pool system
//!
//! Games usually want one pool system reachable from anywhere on the frame
//! loop thread. The instance lives in thread-local storage: it is created by
//! [`initialize`], reached through [`with`] and torn down by [`shutdown`].
//!
//! "Process-wide" holds only for the thread that called [`initialize`]. Every
//! other thread sees its own empty slot, so [`with`] returns `None` and
//! [`is_initialized`] returns false there. Drive all pooling from the thread
//! that runs the host's frame loop.
//!
//! Tests and tools that want isolation construct their own [`PoolSystem`].

use super::registry::PoolSystem;
use super::settings::PoolSystemSettings;
use crate::host::ObjectHost;
use std::cell::RefCell;

thread_local! {
    static SYSTEM: RefCell<Option<PoolSystem>> = const { RefCell::new(None) };
}

/// Create and start the process-wide pool system
///
/// Returns false if it already exists.
pub fn initialize<H: ObjectHost + ?Sized>(settings: PoolSystemSettings, host: &mut H) -> bool {
    SYSTEM.with(|slot| {
        let Ok(mut slot) = slot.try_borrow_mut() else {
            log::warn!("Pool system is busy; cannot initialize it from inside `with`");
            return false;
        };
        if slot.is_some() {
            return false;
        }

        let mut system = PoolSystem::new(settings);
        system.start(host);
        *slot = Some(system);
        true
    })
}

/// Run `f` against the process-wide pool system
///
/// Returns `None` if it is not initialized or `with` is already running.
pub fn with<R>(f: impl FnOnce(&mut PoolSystem) -> R) -> Option<R> {
    SYSTEM.with(|slot| {
        let Ok(mut slot) = slot.try_borrow_mut() else {
            log::warn!("Nested access to the pool system");
            return None;
        };
        slot.as_mut().map(f)
    })
}

/// Whether the process-wide pool system exists
pub fn is_initialized() -> bool {
    SYSTEM.with(|slot| slot.try_borrow().map_or(true, |slot| slot.is_some()))
}

/// Remove every pool and drop the process-wide pool system
///
/// Returns false if it did not exist.
pub fn shutdown<H: ObjectHost + ?Sized>(host: &mut H) -> bool {
    let system = SYSTEM.with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()));
    match system {
        Some(mut system) => {
            system.shutdown(host);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::memory::MemoryHost;
    use crate::host::Placement;
    use crate::pooling::PoolDefinition;

    #[test]
    fn test_global_lifecycle() {
        let mut host = MemoryHost::new();
        let template = host.create_object("Shell");
        let settings = PoolSystemSettings {
            persistent: vec![PoolDefinition::new(template)],
            ..PoolSystemSettings::default()
        };

        assert!(!is_initialized());
        assert!(with(|system| system.pool_count()).is_none());

        assert!(initialize(settings.clone(), &mut host));
        assert!(!initialize(settings, &mut host));
        assert!(is_initialized());

        let instance = with(|system| system.spawn(&mut host, template, None, Placement::world()))
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(with(|system| system.template_of(instance)), Some(Some(template)));

        assert!(shutdown(&mut host));
        assert!(!is_initialized());
        assert!(!shutdown(&mut host));
    }

    #[test]
    fn test_nested_access_is_refused() {
        let mut host = MemoryHost::new();
        initialize(PoolSystemSettings::default(), &mut host);

        let nested = with(|_| with(|system| system.pool_count()));

        assert_eq!(nested, Some(None));
        shutdown(&mut host);
    }

    #[test]
    fn test_other_threads_see_no_system() {
        let mut host = MemoryHost::new();
        initialize(PoolSystemSettings::default(), &mut host);

        let elsewhere = std::thread::spawn(|| (is_initialized(), with(|system| system.pool_count())))
            .join()
            .unwrap();

        assert_eq!(elsewhere, (false, None));
        assert!(is_initialized());
        shutdown(&mut host);
    }
}
