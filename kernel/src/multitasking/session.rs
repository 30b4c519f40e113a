//! Session / process-group hierarchy (spec §3, §4.6): "each process
//! belongs to exactly one group; each group to exactly one session."
//! Modeled as ID-keyed global tables in the idiom of
//! [`super::process::ProcessTree`] rather than an `Arc` graph of
//! sessions/groups/processes pointing at each other — that shape would
//! reproduce the very cyclic-refcount hazard spec §9 calls out for the
//! VFS, for no benefit here since membership is exactly what a lookup
//! table already models.

use super::{process::ProcessId, ProcessError};
use alloc::{collections::BTreeMap, vec::Vec};
use util::mutex::Mutex;

pub struct ProcessGroup {
    pub pgid: ProcessId,
    pub sid: ProcessId,
    members: Vec<ProcessId>,
}

impl ProcessGroup {
    pub fn members(&self) -> &[ProcessId] {
        &self.members
    }
}

pub struct Session {
    pub sid: ProcessId,
    groups: Vec<ProcessId>,
}

impl Session {
    pub fn groups(&self) -> &[ProcessId] {
        &self.groups
    }
}

static GROUPS: Mutex<BTreeMap<ProcessId, ProcessGroup>> = Mutex::new(BTreeMap::new());
static SESSIONS: Mutex<BTreeMap<ProcessId, Session>> = Mutex::new(BTreeMap::new());
/// pid -> the pgid of the group it currently belongs to.
static MEMBERSHIP: Mutex<BTreeMap<ProcessId, ProcessId>> = Mutex::new(BTreeMap::new());

fn leave_group(
    groups: &mut BTreeMap<ProcessId, ProcessGroup>,
    sessions: &mut BTreeMap<ProcessId, Session>,
    membership: &mut BTreeMap<ProcessId, ProcessId>,
    pid: ProcessId,
) {
    let Some(old_pgid) = membership.remove(&pid) else {
        return;
    };
    let Some(group) = groups.get_mut(&old_pgid) else {
        return;
    };
    group.members.retain(|&p| p != pid);
    if group.members.is_empty() {
        let sid = group.sid;
        groups.remove(&old_pgid);
        if let Some(session) = sessions.get_mut(&sid) {
            session.groups.retain(|&g| g != old_pgid);
            if session.groups.is_empty() {
                sessions.remove(&sid);
            }
        }
    }
}

/// First group/session membership a freshly created process gets: its own
/// singleton session and group, exactly as if it had called `setsid`
/// (used by [`super::process::init`] for the colonel process and by
/// `fork` for a child that doesn't request namespace changes — a child
/// ordinarily joins its parent's group, done by the caller via
/// [`setpgid`] right after).
pub fn init_own_session(pid: ProcessId) {
    let mut groups = GROUPS.lock();
    let mut sessions = SESSIONS.lock();
    let mut membership = MEMBERSHIP.lock();
    sessions.insert(
        pid,
        Session {
            sid: pid,
            groups: alloc::vec![pid],
        },
    );
    groups.insert(
        pid,
        ProcessGroup {
            pgid: pid,
            sid: pid,
            members: alloc::vec![pid],
        },
    );
    membership.insert(pid, pid);
}

/// `setsid` (spec §4.6): makes `pid` the leader of a brand new session and
/// group. Rejected if `pid` already leads a group (matches POSIX: a
/// process group leader may not call `setsid`).
pub fn setsid(pid: ProcessId) -> Result<ProcessId, ProcessError> {
    let mut groups = GROUPS.lock();
    let mut sessions = SESSIONS.lock();
    let mut membership = MEMBERSHIP.lock();
    if membership.get(&pid) == Some(&pid) {
        return Err(ProcessError::SessionLeaderAlready);
    }
    leave_group(&mut groups, &mut sessions, &mut membership, pid);
    sessions.insert(
        pid,
        Session {
            sid: pid,
            groups: alloc::vec![pid],
        },
    );
    groups.insert(
        pid,
        ProcessGroup {
            pgid: pid,
            sid: pid,
            members: alloc::vec![pid],
        },
    );
    membership.insert(pid, pid);
    Ok(pid)
}

/// `setpgid` (spec §4.6): moves `pid` into group `pgid`, creating that
/// group (in `pid`'s current session) if it doesn't exist yet.
pub fn setpgid(pid: ProcessId, pgid: ProcessId) -> Result<(), ProcessError> {
    let mut groups = GROUPS.lock();
    let mut sessions = SESSIONS.lock();
    let mut membership = MEMBERSHIP.lock();

    let sid = membership
        .get(&pid)
        .and_then(|old_pgid| groups.get(old_pgid))
        .map(|g| g.sid)
        .ok_or(ProcessError::UnknownProcess)?;

    leave_group(&mut groups, &mut sessions, &mut membership, pid);

    let group = groups.entry(pgid).or_insert_with(|| {
        sessions
            .get_mut(&sid)
            .expect("session vanished while holding its lock")
            .groups
            .push(pgid);
        ProcessGroup {
            pgid,
            sid,
            members: Vec::new(),
        }
    });
    group.members.push(pid);
    membership.insert(pid, pgid);
    Ok(())
}

pub fn pgid_of(pid: ProcessId) -> Option<ProcessId> {
    MEMBERSHIP.lock().get(&pid).copied()
}

pub fn sid_of(pid: ProcessId) -> Option<ProcessId> {
    let membership = MEMBERSHIP.lock();
    let pgid = membership.get(&pid)?;
    GROUPS.lock().get(pgid).map(|g| g.sid)
}
