//! Platform detection.
//!
//! [`probe`] walks an ordered table of signature checks against a
//! [`SignatureSource`]; the first match wins and no match yields
//! [`PlatformProfile::Generic`].  Probes are read-only and fail closed: a
//! source that cannot be read simply means "not this platform".
//!
//! [`detect`] runs the probe against the real host once and caches the result
//! for the rest of the process.

use std::io;
use std::sync::OnceLock;

use tracing::{debug, info, warn};
use tunekit_types::PlatformProfile;

/// Read-only access to the files a signature check inspects.
pub trait SignatureSource {
    fn read(&self, path: &str) -> io::Result<String>;
}

/// Reads signatures from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostSignatureSource;

impl SignatureSource for HostSignatureSource {
    fn read(&self, path: &str) -> io::Result<String> {
        std::fs::read_to_string(path)
    }
}

/// How a single signature file is matched.
enum Matcher {
    /// File content contains any of the needles (case-sensitive).
    Contains(&'static [&'static str]),
    /// File is readable and non-empty.
    Present,
}

struct Check {
    path: &'static str,
    matcher: Matcher,
}

struct Signature {
    profile: PlatformProfile,
    /// Any passing check selects the profile.
    checks: &'static [Check],
}

const DEVICE_TREE_MODEL: &str = "/proc/device-tree/model";

/// Evaluated top to bottom.  Cloud signatures precede the x86 check because
/// virtual machines also report Intel/AMD CPUs.
const SIGNATURES: &[Signature] = &[
    Signature {
        profile: PlatformProfile::RaspberryPi,
        checks: &[Check {
            path: DEVICE_TREE_MODEL,
            matcher: Matcher::Contains(&["Raspberry Pi"]),
        }],
    },
    Signature {
        profile: PlatformProfile::JetsonOrin,
        checks: &[
            Check {
                path: DEVICE_TREE_MODEL,
                matcher: Matcher::Contains(&["NVIDIA Jetson"]),
            },
            Check {
                path: "/etc/nv_tegra_release",
                matcher: Matcher::Present,
            },
        ],
    },
    Signature {
        profile: PlatformProfile::CloudVm,
        checks: &[
            Check {
                path: "/sys/class/dmi/id/sys_vendor",
                matcher: Matcher::Contains(&["Amazon EC2", "Google", "QEMU", "VMware", "Xen"]),
            },
            Check {
                path: "/sys/class/dmi/id/product_name",
                matcher: Matcher::Contains(&[
                    "Virtual Machine",
                    "KVM",
                    "HVM domU",
                    "Google Compute Engine",
                    "VMware",
                ]),
            },
            Check {
                path: "/sys/hypervisor/type",
                matcher: Matcher::Present,
            },
        ],
    },
    Signature {
        profile: PlatformProfile::X86Workstation,
        checks: &[Check {
            path: "/proc/cpuinfo",
            matcher: Matcher::Contains(&["GenuineIntel", "AuthenticAMD"]),
        }],
    },
];

impl Check {
    fn passes(&self, source: &dyn SignatureSource) -> bool {
        let content = match source.read(self.path) {
            Ok(content) => content,
            Err(e) => {
                debug!(path = self.path, error = %e, "signature source unreadable");
                return false;
            }
        };
        match self.matcher {
            Matcher::Contains(needles) => needles.iter().any(|n| content.contains(n)),
            Matcher::Present => !content.trim().is_empty(),
        }
    }
}

/// Identify the platform behind `source`.  Deterministic for a fixed source.
pub fn probe(source: &dyn SignatureSource) -> PlatformProfile {
    SIGNATURES
        .iter()
        .find(|sig| sig.checks.iter().any(|check| check.passes(source)))
        .map(|sig| sig.profile)
        .unwrap_or(PlatformProfile::Generic)
}

static DETECTED: OnceLock<PlatformProfile> = OnceLock::new();

/// Probe the local host once and return the cached profile thereafter.
pub fn detect() -> PlatformProfile {
    *DETECTED.get_or_init(|| {
        let profile = probe(&HostSignatureSource);
        if profile.is_generic() {
            warn!("no platform signature matched; every operation will be denied");
        } else {
            info!(platform = %profile, "platform detected");
        }
        profile
    })
}
