//! System queries

use buildfork_host_api::{HostError, HostResult};

/// Total physical memory in bytes
pub fn total_memory() -> HostResult<u64> {
    // SAFETY: sysconf only reads system configuration.
    let (pages, page_size) = unsafe {
        (
            nix::libc::sysconf(nix::libc::_SC_PHYS_PAGES),
            nix::libc::sysconf(nix::libc::_SC_PAGESIZE),
        )
    };

    if pages <= 0 || page_size <= 0 {
        return Err(HostError::Internal(
            "unable to determine physical memory".into(),
        ));
    }

    Ok(pages as u64 * page_size as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_some_memory() {
        let total = total_memory().unwrap();
        assert!(total >= 64 * 1024 * 1024);
    }
}
