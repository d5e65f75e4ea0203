//! Crate backplane shared by the modules
//!
//! The backplane has single-owner roles (wired-OR trigger pull-ups, run
//! leader, director) and the sync-wait count that gates synchronised run
//! starts. Module threads update it concurrently, so everything here is a
//! lock-free atomic: a role is claimed with one compare-and-swap and
//! callers must not spin on a denied claim.

use crate::error::{PixieError, Result};
use pixie16_chip::hw::{Slot, MAX_SLOTS};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, info};

/// What the backplane needs to know about a module
pub trait BackplaneMember {
    /// Physical slot
    fn slot(&self) -> Slot;

    /// The module is open
    fn opened(&self) -> bool;

    /// The module is online
    fn online(&self) -> bool;

    /// The sync-wait state the module wants
    fn sync_wait_requested(&self) -> bool {
        false
    }
}

/// A role one slot may lead
#[derive(Debug)]
pub struct Role {
    /// Role name for logs
    pub label: &'static str,
    leader: AtomicUsize,
}

impl Role {
    /// Leader value of an unowned role
    pub const RELEASED: usize = usize::MAX;

    /// Create an unowned role
    pub const fn new(label: &'static str) -> Self {
        Self {
            label,
            leader: AtomicUsize::new(Self::RELEASED),
        }
    }

    /// Claim the role for `member`
    ///
    /// Succeeds when the role was unowned or `member` already leads it.
    /// A member that is not open never gets a role.
    pub fn request<M: BackplaneMember + ?Sized>(&self, member: &M) -> bool {
        if !member.opened() {
            return false;
        }
        let slot = member.slot();
        match self
            .leader
            .compare_exchange(Self::RELEASED, slot, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                info!("backplane: {}: leader: slot={slot}", self.label);
                true
            }
            Err(current) => current == slot,
        }
    }

    /// Give up the role if `member` leads it
    pub fn release<M: BackplaneMember + ?Sized>(&self, member: &M) -> bool {
        if !member.opened() {
            return false;
        }
        let slot = member.slot();
        let released = self
            .leader
            .compare_exchange(slot, Self::RELEASED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if released {
            info!("backplane: {}: released: slot={slot}", self.label);
        }
        released
    }

    /// Leader's slot
    pub fn slot(&self) -> Option<Slot> {
        match self.leader.load(Ordering::Acquire) {
            Self::RELEASED => None,
            slot => Some(slot),
        }
    }

    /// Someone leads the role
    pub fn has_leader(&self) -> bool {
        self.slot().is_some()
    }

    /// `member` leads the role
    pub fn is_leader<M: BackplaneMember + ?Sized>(&self, member: &M) -> bool {
        self.slot() == Some(member.slot())
    }

    /// Someone other than `member` leads the role
    ///
    /// False both when there is no leader and when `member` leads.
    pub fn not_leader<M: BackplaneMember + ?Sized>(&self, member: &M) -> bool {
        self.has_leader() && !self.is_leader(member)
    }
}

/// The crate's backplane
#[derive(Debug)]
pub struct Backplane {
    /// Pull-ups on the wired-OR trigger lines
    pub wired_or_triggers_pullup: Role,
    /// Run leader: drives the SYNC line pull-up
    pub run: Role,
    /// Multi-crate director
    pub director: Role,
    num_slots_present: AtomicUsize,
    sync_waits: AtomicUsize,
    num_slots: AtomicUsize,
    waiters: [AtomicBool; MAX_SLOTS],
}

impl Default for Backplane {
    fn default() -> Self {
        Self::new()
    }
}

impl Backplane {
    /// A backplane with no modules and no leaders
    pub fn new() -> Self {
        Self {
            wired_or_triggers_pullup: Role::new("wired-or-triggers"),
            run: Role::new("run"),
            director: Role::new("director"),
            num_slots_present: AtomicUsize::new(0),
            sync_waits: AtomicUsize::new(0),
            num_slots: AtomicUsize::new(MAX_SLOTS),
            waiters: std::array::from_fn(|_| AtomicBool::new(false)),
        }
    }

    /// Modules counted present
    pub fn num_slots_present(&self) -> usize {
        self.num_slots_present.load(Ordering::Acquire)
    }

    /// Modules in the sync-wait state
    pub fn sync_waits(&self) -> usize {
        self.sync_waits.load(Ordering::Acquire)
    }

    /// Slots tracked
    pub fn num_slots(&self) -> usize {
        self.num_slots.load(Ordering::Acquire)
    }

    /// Is the module in `slot` recorded as waiting?
    pub fn waiting(&self, slot: Slot) -> bool {
        self.waiters
            .get(slot)
            .is_some_and(|w| w.load(Ordering::Acquire))
    }

    /// Reset the sync-wait state for a new presence map
    pub fn init(&self, num_slots: usize, num_present: usize) {
        let num_slots = num_slots.min(MAX_SLOTS);
        debug!("backplane: init: slots={num_slots} present={num_present}");
        self.sync_waits.store(0, Ordering::Release);
        self.num_slots_present.store(num_present, Ordering::Release);
        self.num_slots.store(num_slots, Ordering::Release);
        for waiter in &self.waiters {
            waiter.store(false, Ordering::Release);
        }
    }

    /// Reset the sync-wait state keeping the slot count
    pub fn init_present(&self, num_present: usize) {
        self.init(self.num_slots(), num_present);
    }

    /// Reset, then replay each member's requested sync-wait state
    ///
    /// # Errors
    ///
    /// `InternalFailure` if the replayed count exceeds `num_present`.
    pub fn reinit<'a, M, I>(&self, members: I, num_present: usize) -> Result<()>
    where
        M: BackplaneMember + ?Sized + 'a,
        I: IntoIterator<Item = &'a M>,
    {
        self.init_present(num_present);
        for member in members {
            if member.online() {
                self.sync_wait(member, member.sync_wait_requested())?;
            }
        }
        Ok(())
    }

    /// Record a module's sync-wait state
    ///
    /// Only online modules count and only a change of state moves the
    /// count. Leaving the state never takes the count below zero.
    ///
    /// # Errors
    ///
    /// `InternalFailure` if the count exceeds the modules present.
    pub fn sync_wait<M: BackplaneMember + ?Sized>(&self, member: &M, requested: bool) -> Result<()> {
        if !member.online() {
            return Ok(());
        }
        let slot = member.slot();
        let Some(waiter) = self.waiters.get(slot).filter(|_| slot < self.num_slots()) else {
            return Err(PixieError::internal(format!(
                "slot: {slot}: outside the backplane"
            )));
        };
        if waiter.load(Ordering::Acquire) == requested {
            return Ok(());
        }
        if requested {
            self.sync_waits.fetch_add(1, Ordering::AcqRel);
        } else {
            // A module that never recorded a wait can still ask to leave.
            let _ = self
                .sync_waits
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        }
        waiter.store(requested, Ordering::Release);

        let waits = self.sync_waits();
        debug!("backplane: sync-wait: slot={slot} wait={requested} waits={waits}");
        if waits > self.num_slots_present() {
            return Err(PixieError::internal(format!(
                "slot: {slot}: invalid backplane sync_wait value: {waits}"
            )));
        }
        Ok(())
    }

    /// Check the crate can start a synchronised run
    ///
    /// # Errors
    ///
    /// `ModuleInvalidOperation` if some but not all modules wait, or
    /// modules wait with no run leader.
    pub fn sync_wait_valid(&self) -> Result<()> {
        let waits = self.sync_waits();
        let present = self.num_slots_present();
        if waits != 0 && waits != present {
            return Err(PixieError::invalid_operation(format!(
                "sync wait mode enabled and not all slots in the sync wait state: \
                 {waits} of {present} waiting"
            )));
        }
        if waits != 0 && !self.run.has_leader() {
            return Err(PixieError::invalid_operation(
                "sync wait mode enabled but no run leader slot is assigned",
            ));
        }
        Ok(())
    }

    /// A module went offline: drop its sync-wait record
    pub fn offline<M: BackplaneMember + ?Sized>(&self, member: &M) {
        let slot = member.slot();
        if let Some(waiter) = self.waiters.get(slot) {
            if waiter.swap(false, Ordering::AcqRel) {
                let _ = self
                    .sync_waits
                    .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
            }
        }
    }
}
