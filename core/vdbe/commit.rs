//! The transaction commit/rollback coordinator.
//!
//! A halting program hands its outcome to this module. Commits over a
//! single database file run the two phases directly; commits spanning
//! several files are made atomic through a master journal: every
//! participant's phase-one journal embeds the master's name, and
//! deleting the master is the one atomic commit point. Recovery at open
//! time resolves an interrupted commit either way — a missing master
//! (or one whose every named participant finished phase one) finishes
//! phase two, anything else restores the pre-transaction images.

use std::rc::Rc;

use log::trace;
use rand::{thread_rng, Rng};

use crate::error::VellumError;
use crate::io::Vfs;
use crate::storage::DatabaseFile;
use crate::{Connection, Result, TransactionState};

/// Commit every open file-level transaction on the connection.
/// Invoked once per halt; the commit hook may veto with a
/// constraint-violation outcome before anything is persisted.
pub(crate) fn commit_all(conn: &Connection) -> Result<()> {
    let files = conn.files_snapshot();
    let write_files: Vec<Rc<dyn DatabaseFile>> = files
        .iter()
        .filter(|f| f.in_write_tx() && !f.is_ephemeral())
        .cloned()
        .collect();

    if !write_files.is_empty() && conn.invoke_commit_hook() {
        return Err(VellumError::Constraint(
            "commit vetoed by commit hook".to_string(),
        ));
    }

    let needs_master = write_files.len() > 1 && !files[0].is_ephemeral();
    if !needs_master {
        trace!("commit: single-file path ({} write files)", write_files.len());
        for file in &files {
            file.commit_phase_one(None)?;
        }
        for file in &files {
            file.commit_phase_two()?;
        }
    } else {
        let vfs = conn.vfs();
        let master = master_journal_name(vfs.as_ref(), files[0].path());
        trace!("commit: master journal {}", master);
        let names: Vec<String> = write_files.iter().map(|f| f.journal_path()).collect();
        vfs.write_file(&master, names.join("\n").as_bytes())?;
        vfs.sync(&master)?;
        for file in &files {
            let master_ref = if file.in_write_tx() && !file.is_ephemeral() {
                Some(master.as_str())
            } else {
                None
            };
            file.commit_phase_one(master_ref)?;
        }
        // deleting the master journal is the atomic commit point; on
        // failure it stays behind for recovery to finish the job
        vfs.delete_file(&master)?;
        for file in &files {
            file.commit_phase_two()?;
        }
    }
    conn.transaction_state.set(TransactionState::None);
    conn.auto_commit.set(true);
    Ok(())
}

/// Roll back every open file-level transaction. Trees may be
/// restructured by this, so every cursor on the connection is tripped
/// first and refuses further use.
pub(crate) fn rollback_all(conn: &Connection) -> Result<()> {
    conn.bump_trip_generation();
    conn.bump_write_generation();
    for file in conn.files_snapshot() {
        file.rollback()?;
    }
    conn.auto_commit.set(true);
    conn.transaction_state.set(TransactionState::None);
    Ok(())
}

/// A name no other file is using, derived from the main database path
/// plus a random suffix.
pub(crate) fn master_journal_name(vfs: &dyn Vfs, main_path: &str) -> String {
    let mut rng = thread_rng();
    loop {
        let name = format!("{}-mj{:08x}", main_path, rng.gen::<u32>());
        if !vfs.exists(&name) {
            return name;
        }
    }
}

/// Resolve interrupted multi-file commits. Must run after every
/// participating file has been attached. For each master journal still
/// present: if every file it names completed phase one against it, the
/// commit is redone to completion (phase two); otherwise every
/// participant is rolled back from its journal. Either way the outcome
/// covers all files or none.
pub fn recover(conn: &Connection) -> Result<()> {
    let files = conn.files_snapshot();
    let vfs = conn.vfs();
    let mut masters: Vec<String> = Vec::new();
    for file in &files {
        if let Some(master) = file.pending_master()? {
            if !masters.contains(&master) {
                masters.push(master);
            }
        }
    }
    for master in masters {
        let commit = if !vfs.exists(&master) {
            // the commit point passed; the journals are leftovers of a
            // completed commit
            true
        } else {
            match vfs.read_file(&master)? {
                Some(body) => {
                    let named: Vec<String> = String::from_utf8_lossy(&body)
                        .split('\n')
                        .filter(|s| !s.is_empty())
                        .map(|s| s.to_string())
                        .collect();
                    named.iter().all(|journal| {
                        files.iter().any(|f| {
                            f.journal_path() == *journal
                                && matches!(f.pending_master(), Ok(Some(ref m)) if *m == master)
                        })
                    })
                }
                None => true,
            }
        };
        trace!("recover: master {} -> {}", master, if commit { "commit" } else { "rollback" });
        for file in &files {
            let participates = matches!(file.pending_master(), Ok(Some(ref m)) if *m == master);
            if !participates {
                continue;
            }
            if commit {
                file.recover_commit()?;
            } else {
                file.recover_rollback()?;
            }
        }
        if vfs.exists(&master) {
            vfs.delete_file(&master)?;
        }
    }
    Ok(())
}
