// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::ffi::CString;

/// Name reported to `ps` ahead of the role suffix.
pub const PROC_NAME: &str = "mpsocks";

/// Best-effort process retitling via `PR_SET_NAME`. The kernel caps the
/// name at 15 bytes, so long titles are truncated; failures leave the
/// title unchanged.
pub fn set_title(title: &str) {
    let mut name = format!("{PROC_NAME}: {title}").into_bytes();
    name.truncate(15);

    if let Ok(name) = CString::new(name) {
        unsafe {
            libc::prctl(libc::PR_SET_NAME, name.as_ptr() as libc::c_ulong, 0, 0, 0);
        }
    }
}
