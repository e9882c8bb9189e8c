//! Write session lease
//!
//! Holds one ConfigLock write session and releases it on drop, so every
//! exit path of a commit or audit gives the lock back.

use crate::lock::{ConfigLock, LockOperation, LockResult, WriteType};

pub struct WriteLease<'a> {
    lock: &'a ConfigLock,
    session_id: u32,
    config_id: u32,
    write_type: WriteType,
}

impl<'a> WriteLease<'a> {
    pub fn acquire(lock: &'a ConfigLock, session_id: u32, write_type: WriteType) -> LockResult<Self> {
        let grant = lock.get_lock(
            session_id,
            LockOperation::AcquireWriteSession,
            Some(write_type),
            None,
            None,
        )?;
        Ok(Self {
            lock,
            session_id,
            config_id: grant.config_id,
            write_type,
        })
    }

    /// Config id of the owning session, 0 for system-wide writes without one
    pub fn config_id(&self) -> u32 {
        self.config_id
    }

    pub fn write_type(&self) -> WriteType {
        self.write_type
    }
}

impl Drop for WriteLease<'_> {
    fn drop(&mut self) {
        // Already gone if a state transition reset the lock table
        let _ = self.lock.release_lock(
            self.session_id,
            self.config_id,
            LockOperation::AcquireWriteSession,
            Some(self.write_type),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockError, UncState};

    #[test]
    fn test_lease_releases_on_drop() {
        let lock = ConfigLock::new(UncState::Act);
        {
            let lease = WriteLease::acquire(&lock, 0, WriteType::AuditUser).unwrap();
            assert_eq!(lease.config_id(), 0);
            assert!(matches!(
                WriteLease::acquire(&lock, 1, WriteType::AuditDriver),
                Err(LockError::Busy(_))
            ));
        }
        assert!(WriteLease::acquire(&lock, 1, WriteType::AuditDriver).is_ok());
    }

    #[test]
    fn test_commit_lease_requires_session() {
        let lock = ConfigLock::new(UncState::Act);
        assert!(matches!(
            WriteLease::acquire(&lock, 10, WriteType::Commit),
            Err(LockError::InvalidSessionId(10))
        ));
    }
}
