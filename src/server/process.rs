// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Thin wrappers over the POSIX process primitives the supervisor needs,
//! plus the worker slot table.

use std::io;

#[derive(Debug)]
pub enum Fork {
    Parent(libc::pid_t),
    Child,
}

pub fn fork() -> io::Result<Fork> {
    match unsafe { libc::fork() } {
        -1 => Err(io::Error::last_os_error()),
        0 => Ok(Fork::Child),
        pid => Ok(Fork::Parent(pid)),
    }
}

fn control_sigset() -> libc::sigset_t {
    unsafe {
        let mut set = std::mem::MaybeUninit::<libc::sigset_t>::zeroed();
        libc::sigemptyset(set.as_mut_ptr());
        libc::sigaddset(set.as_mut_ptr(), libc::SIGINT);
        libc::sigaddset(set.as_mut_ptr(), libc::SIGTERM);
        libc::sigaddset(set.as_mut_ptr(), libc::SIGCHLD);
        set.assume_init()
    }
}

/// Blocks SIGINT/SIGTERM/SIGCHLD. Called in the master before the first
/// fork; a signal delivered between spawn and the first wait stays
/// pending instead of being lost.
pub fn block_signals() -> io::Result<()> {
    let set = control_sigset();
    match unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) } {
        0 => Ok(()),
        err => Err(io::Error::from_raw_os_error(err)),
    }
}

/// Undoes [`block_signals`] in a freshly forked worker so its reactor can
/// observe the shutdown signals.
pub fn unblock_signals() -> io::Result<()> {
    let set = control_sigset();
    match unsafe { libc::pthread_sigmask(libc::SIG_UNBLOCK, &set, std::ptr::null_mut()) }
    {
        0 => Ok(()),
        err => Err(io::Error::from_raw_os_error(err)),
    }
}

/// Waits for the next control signal. `sigwait` consumes the pending
/// signal and re-arms by construction, so repeated deliveries stay
/// observable.
pub fn wait_signal() -> io::Result<libc::c_int> {
    let set = control_sigset();
    let mut sig: libc::c_int = 0;
    loop {
        match unsafe { libc::sigwait(&set, &mut sig) } {
            0 => return Ok(sig),
            libc::EINTR => continue,
            err => return Err(io::Error::from_raw_os_error(err)),
        }
    }
}

/// Non-blocking reap of every terminated child, retrying on EINTR.
pub fn reap_exited() -> Vec<libc::pid_t> {
    let mut reaped = Vec::new();
    loop {
        let mut status: libc::c_int = 0;
        match unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) } {
            0 => break,
            -1 => {
                if io::Error::last_os_error().raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                break;
            },
            pid => reaped.push(pid),
        }
    }
    reaped
}

pub fn kill(pid: libc::pid_t, signal: libc::c_int) -> io::Result<()> {
    match unsafe { libc::kill(pid, signal) } {
        -1 => Err(io::Error::last_os_error()),
        _ => Ok(()),
    }
}

/// Detaches from the controlling terminal: fork, session leader, stdio to
/// /dev/null. The parent exits immediately.
pub fn daemonize() -> io::Result<()> {
    if let Fork::Parent(_) = fork()? {
        std::process::exit(0);
    }

    if unsafe { libc::setsid() } == -1 {
        return Err(io::Error::last_os_error());
    }

    let devnull = unsafe {
        libc::open(c"/dev/null".as_ptr(), libc::O_RDWR)
    };
    if devnull == -1 {
        return Err(io::Error::last_os_error());
    }

    unsafe {
        libc::dup2(devnull, libc::STDIN_FILENO);
        libc::dup2(devnull, libc::STDOUT_FILENO);
        libc::dup2(devnull, libc::STDERR_FILENO);
        if devnull > libc::STDERR_FILENO {
            libc::close(devnull);
        }
    }

    Ok(())
}

/// Fixed-size worker slot table. A slot with pid -1 is unoccupied; new
/// workers always take the lowest free slot.
#[derive(Debug)]
pub struct WorkerTable {
    slots: Vec<Slot>,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    pid: libc::pid_t,
    exited: bool,
}

impl WorkerTable {
    pub fn new(n: usize) -> Self {
        Self {
            slots: vec![
                Slot {
                    pid: -1,
                    exited: true,
                };
                n
            ],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Lowest unoccupied slot index, if any.
    pub fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(|s| s.pid == -1)
    }

    pub fn occupy(&mut self, idx: usize, pid: libc::pid_t) {
        self.slots[idx] = Slot { pid, exited: false };
    }

    /// Records a reaped pid. Unknown pids are ignored.
    pub fn mark_exited(&mut self, pid: libc::pid_t) {
        for slot in &mut self.slots {
            if slot.pid == pid {
                slot.exited = true;
            }
        }
    }

    /// Every pid currently occupying a slot.
    pub fn occupied(&self) -> Vec<libc::pid_t> {
        self.slots
            .iter()
            .filter(|s| s.pid != -1)
            .map(|s| s.pid)
            .collect()
    }

    /// Frees every slot whose worker has exited and returns their indices
    /// for respawning.
    pub fn take_exited(&mut self) -> Vec<usize> {
        let mut freed = Vec::new();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if slot.pid != -1 && slot.exited {
                slot.pid = -1;
                freed.push(idx);
            }
        }
        freed
    }
}
