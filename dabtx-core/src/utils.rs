//! Thread plumbing helpers shared by the DSP and output workers.

/// Request round-robin realtime scheduling for the calling thread
/// with the given priority offset above the minimum. Failure is
/// reported, not fatal; the pipeline runs at normal priority then.
#[cfg(target_os = "linux")]
pub fn set_realtime_prio(offset: i32) -> Result<(), i32> {
    unsafe {
        let min = libc::sched_get_priority_min(libc::SCHED_RR);
        let param = libc::sched_param {
            sched_priority: min + offset,
        };
        let ret = libc::pthread_setschedparam(libc::pthread_self(), libc::SCHED_RR, &param);
        if ret == 0 {
            Ok(())
        } else {
            Err(ret)
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_realtime_prio(_offset: i32) -> Result<(), i32> {
    Ok(())
}

/// Name the calling thread, truncated to the 15-character kernel
/// limit.
#[cfg(target_os = "linux")]
pub fn set_thread_name(name: &str) {
    let truncated: String = name.chars().take(15).collect();
    if let Ok(cname) = std::ffi::CString::new(truncated) {
        unsafe {
            libc::pthread_setname_np(libc::pthread_self(), cname.as_ptr());
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn set_thread_name(_name: &str) {}
