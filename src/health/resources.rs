//! # Passive /proc resource sampling.
//!
//! Reads resident memory from `/proc/<pid>/statm` and CPU time from
//! `/proc/<pid>/stat`. CPU usage is a rate, so the first sample for a pid
//! only seeds a baseline; subsequent samples report the percentage over the
//! elapsed window.
//!
//! Sampling is best-effort: any read or parse failure yields `None` and the
//! record keeps its previous values. Non-Linux targets never sample.

use std::time::Instant;

/// CPU-time baseline carried between check cycles.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CpuBaseline {
    ticks: u64,
    at: Instant,
}

/// One resource sample.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResourceSample {
    /// Resident set size, MiB.
    pub rss_mb: f64,
    /// CPU usage over the window since the previous sample, percent.
    /// `None` on the seeding sample.
    pub cpu_pct: Option<f64>,
}

#[cfg(target_os = "linux")]
pub(crate) fn sample(
    pid: u32,
    baseline: &mut Option<CpuBaseline>,
    now: Instant,
) -> Option<ResourceSample> {
    let rss_mb = read_rss_mb(pid)?;
    let ticks = read_cpu_ticks(pid)?;

    let cpu_pct = match baseline.take() {
        Some(prev) => {
            let window = now.saturating_duration_since(prev.at).as_secs_f64();
            if window > 0.0 {
                let delta = ticks.saturating_sub(prev.ticks) as f64;
                Some(delta / clk_tck() as f64 / window * 100.0)
            } else {
                None
            }
        }
        None => None,
    };
    *baseline = Some(CpuBaseline { ticks, at: now });

    Some(ResourceSample { rss_mb, cpu_pct })
}

/// Resident pages from `/proc/<pid>/statm`, converted to MiB.
#[cfg(target_os = "linux")]
fn read_rss_mb(pid: u32) -> Option<f64> {
    let statm = std::fs::read_to_string(format!("/proc/{pid}/statm")).ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages as f64 * page_size() as f64 / (1024.0 * 1024.0))
}

/// utime + stime clock ticks from `/proc/<pid>/stat`.
///
/// The comm field may contain spaces, so parsing starts after the last `)`.
#[cfg(target_os = "linux")]
fn read_cpu_ticks(pid: u32) -> Option<u64> {
    let stat = std::fs::read_to_string(format!("/proc/{pid}/stat")).ok()?;
    let after_comm = &stat[stat.rfind(')')? + 1..];
    let mut fields = after_comm.split_whitespace();
    // Fields after comm: state(1) ... utime is field 12, stime field 13.
    let utime: u64 = fields.nth(11)?.parse().ok()?;
    let stime: u64 = fields.next()?.parse().ok()?;
    Some(utime + stime)
}

#[cfg(target_os = "linux")]
fn page_size() -> u64 {
    use std::sync::OnceLock;
    static PAGE_SIZE: OnceLock<u64> = OnceLock::new();
    *PAGE_SIZE.get_or_init(|| {
        // SAFETY: sysconf reads system configuration without side effects.
        let result = unsafe { nix::libc::sysconf(nix::libc::_SC_PAGESIZE) };
        if result > 0 {
            result as u64
        } else {
            4096
        }
    })
}

#[cfg(target_os = "linux")]
fn clk_tck() -> u64 {
    use std::sync::OnceLock;
    static CLK_TCK: OnceLock<u64> = OnceLock::new();
    *CLK_TCK.get_or_init(|| {
        // SAFETY: sysconf reads system configuration without side effects.
        let result = unsafe { nix::libc::sysconf(nix::libc::_SC_CLK_TCK) };
        if result > 0 {
            result as u64
        } else {
            100
        }
    })
}

#[cfg(not(target_os = "linux"))]
pub(crate) fn sample(
    _pid: u32,
    _baseline: &mut Option<CpuBaseline>,
    _now: Instant,
) -> Option<ResourceSample> {
    None
}
