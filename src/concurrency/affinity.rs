//! 处理器亲和性：把 reader / writer 固定到不同的处理单元。
//!
//! Pinning is a hint. Depending on [`PinMode`] an unavailable unit either
//! aborts startup or is logged and skipped.
use std::io;

use log::{debug, warn};
use thiserror::Error;

use crate::config::{HarnessConfig, PinMode};
use crate::state::Role;
use crate::util::cpulist::CpuSet;

#[derive(Debug, Error)]
pub enum AffinityError {
    #[error("requested processing unit {0} unavailable")]
    CpuUnavailable(usize),
    #[error("processing unit {0} does not fit in a cpu_set_t")]
    OutOfRange(usize),
    #[error("pinning to processing unit {cpu} failed: {source}")]
    Pin { cpu: usize, source: io::Error },
    #[error("thread affinity is not supported on this platform")]
    Unsupported,
}

/// Which processing unit each worker should be bound to, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AffinityPlan {
    pub mode: PinMode,
    pub reader: Option<usize>,
    pub writer: Option<usize>,
}

impl AffinityPlan {
    pub fn unpinned() -> Self {
        Self {
            mode: PinMode::Off,
            reader: None,
            writer: None,
        }
    }

    /// Checks the requested units against the ones this process may run on.
    pub fn resolve(config: &HarnessConfig) -> Result<Self, AffinityError> {
        if config.pin == PinMode::Off {
            return Ok(Self::unpinned());
        }
        match allowed_cpus() {
            Ok(available) => {
                debug!("available processing units: {:?}", available);
                Self::resolve_against(config, Some(&available))
            }
            Err(err) => {
                warn!("cannot determine available processing units: {}", err);
                Self::resolve_against(config, None)
            }
        }
    }

    /// Like [`resolve`](Self::resolve) with an explicit availability set;
    /// `None` means unknown and every request is kept.
    pub fn resolve_against(
        config: &HarnessConfig,
        available: Option<&CpuSet>,
    ) -> Result<Self, AffinityError> {
        let mut plan = Self {
            mode: config.pin,
            reader: None,
            writer: None,
        };
        if config.pin == PinMode::Off {
            return Ok(plan);
        }
        for (role, cpu) in [
            (Role::Reader, config.reader_cpu),
            (Role::Writer, config.writer_cpu),
        ] {
            let usable = available.is_none_or(|set| set.contains(cpu));
            let slot = match role {
                Role::Reader => &mut plan.reader,
                Role::Writer => &mut plan.writer,
            };
            if usable {
                *slot = Some(cpu);
            } else if config.pin == PinMode::Required {
                return Err(AffinityError::CpuUnavailable(cpu));
            } else {
                warn!(
                    "requested processing unit {} unavailable, {} runs unpinned",
                    cpu, role
                );
            }
        }
        Ok(plan)
    }

    pub fn cpu_for(&self, role: Role) -> Option<usize> {
        match role {
            Role::Reader => self.reader,
            Role::Writer => self.writer,
        }
    }

    /// Pins the calling thread according to the plan for `role`.
    ///
    /// Returns the unit actually pinned to, `None` when the plan leaves the
    /// role unpinned.
    pub fn pin_current(&self, role: Role) -> Result<Option<usize>, AffinityError> {
        match self.cpu_for(role) {
            None => Ok(None),
            Some(cpu) => pin_current_thread(cpu).map(|()| Some(cpu)),
        }
    }
}

/// Online units intersected with this process' affinity mask.
#[cfg(target_os = "linux")]
pub fn allowed_cpus() -> io::Result<CpuSet> {
    let online = CpuSet::online()?;
    // SAFETY: cpu_set_t is plain data; sched_getaffinity fills it in.
    let mask = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        if libc::sched_getaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &mut set) != 0 {
            return Err(io::Error::last_os_error());
        }
        set
    };
    let permitted: CpuSet = (0..libc::CPU_SETSIZE as usize)
        // SAFETY: the index is below CPU_SETSIZE.
        .filter(|&cpu| unsafe { libc::CPU_ISSET(cpu, &mask) })
        .collect();
    Ok(online.intersection(&permitted))
}

#[cfg(not(target_os = "linux"))]
pub fn allowed_cpus() -> io::Result<CpuSet> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "processing unit enumeration is linux-only",
    ))
}

#[cfg(target_os = "linux")]
pub fn pin_current_thread(cpu: usize) -> Result<(), AffinityError> {
    if cpu >= libc::CPU_SETSIZE as usize {
        return Err(AffinityError::OutOfRange(cpu));
    }
    // SAFETY: `set` is a zeroed cpu_set_t and `cpu` was bounds checked above.
    let rc = unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu, &mut set);
        libc::pthread_setaffinity_np(
            libc::pthread_self(),
            std::mem::size_of::<libc::cpu_set_t>(),
            &set,
        )
    };
    if rc != 0 {
        return Err(AffinityError::Pin {
            cpu,
            source: io::Error::from_raw_os_error(rc),
        });
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
pub fn pin_current_thread(_cpu: usize) -> Result<(), AffinityError> {
    Err(AffinityError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(pin: PinMode) -> HarnessConfig {
        HarnessConfig {
            reader_cpu: 2,
            writer_cpu: 3,
            pin,
            ..HarnessConfig::default()
        }
    }

    #[test]
    fn off_never_pins() {
        let plan = AffinityPlan::resolve(&config(PinMode::Off)).unwrap();
        assert_eq!(plan, AffinityPlan::unpinned());
        assert!(plan.pin_current(Role::Reader).unwrap().is_none());
    }

    #[test]
    fn available_units_are_kept() {
        let available = CpuSet::parse("0-7").unwrap();
        let plan =
            AffinityPlan::resolve_against(&config(PinMode::Required), Some(&available)).unwrap();
        assert_eq!(plan.cpu_for(Role::Reader), Some(2));
        assert_eq!(plan.cpu_for(Role::Writer), Some(3));
    }

    #[test]
    fn required_fails_on_missing_unit() {
        let available = CpuSet::parse("0-2").unwrap();
        let err = AffinityPlan::resolve_against(&config(PinMode::Required), Some(&available))
            .unwrap_err();
        assert!(matches!(err, AffinityError::CpuUnavailable(3)));
        assert_eq!(err.to_string(), "requested processing unit 3 unavailable");
    }

    #[test]
    fn preferred_degrades_to_unpinned() {
        let available = CpuSet::parse("0-2").unwrap();
        let plan =
            AffinityPlan::resolve_against(&config(PinMode::Preferred), Some(&available)).unwrap();
        assert_eq!(plan.reader, Some(2));
        assert_eq!(plan.writer, None);
    }

    #[test]
    fn unknown_availability_keeps_requests() {
        let plan = AffinityPlan::resolve_against(&config(PinMode::Preferred), None).unwrap();
        assert_eq!((plan.reader, plan.writer), (Some(2), Some(3)));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pins_to_a_permitted_unit() {
        let Ok(available) = allowed_cpus() else {
            return;
        };
        let Some(cpu) = available.iter().next() else {
            return;
        };
        std::thread::spawn(move || pin_current_thread(cpu))
            .join()
            .unwrap()
            .unwrap();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn rejects_units_beyond_set_size() {
        assert!(matches!(
            pin_current_thread(usize::MAX),
            Err(AffinityError::OutOfRange(_))
        ));
    }
}
