//! Allen-Bradley driver: tag sub-type dispatch and the protocol stack
//! beneath it. A tag's cpu family, routing path and protocol variant select
//! one of five sub-types; only the explicit (Logix, connected messaging)
//! sub-type carries a live back end here.

pub(crate) mod cip;
pub(crate) mod connection;
pub(crate) mod eip;
pub(crate) mod explicit;
pub(crate) mod request;
pub(crate) mod session;

pub use self::connection::CpuType;

use crate::attr::Attrs;
use crate::logging;
use crate::status::Status;
use crate::tag::TagInner;
use std::sync::Arc;

/// Tag sub-types supported by the driver.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum TagKind {
    Group,
    Explicit,
    Implicit,
    Pccc,
    PcccDhp,
}

/// Parse the `cpu` attribute into a controller family. The aliases cover
/// the common model names.
pub(crate) fn cpu_type(attrs: &Attrs) -> Result<CpuType, Status> {
    let cpu = attrs.get_str("cpu", "NONE");

    if ["plc", "plc5", "slc", "slc500"]
        .iter()
        .any(|alias| cpu.eq_ignore_ascii_case(alias))
    {
        Ok(CpuType::Plc5)
    } else if ["micrologix", "mlgx"]
        .iter()
        .any(|alias| cpu.eq_ignore_ascii_case(alias))
    {
        Ok(CpuType::Mlgx)
    } else if ["micro800", "m800"]
        .iter()
        .any(|alias| cpu.eq_ignore_ascii_case(alias))
    {
        Ok(CpuType::M800)
    } else if [
        "compactlogix",
        "clgx",
        "lgx",
        "controllogix",
        "contrologix",
        "flexlogix",
        "flgx",
    ]
    .iter()
    .any(|alias| cpu.eq_ignore_ascii_case(alias))
    {
        Ok(CpuType::Lgx)
    } else {
        Err(Status::BadDevice)
    }
}

/// True when the element after the last comma of the routing path is a DH+
/// `CHAR:INT:INT` triple. A path with no comma has no hop to bridge from
/// and is never DH+.
pub(crate) fn check_dhp(attrs: &Attrs) -> bool {
    let path = attrs.get_str("path", "");

    let last = match path.rfind(',') {
        Some(idx) => &path[idx + 1..],
        None => return false,
    };

    let parts: Vec<&str> = last.split(':').collect();

    parts.len() == 3
        && parts[0].trim().len() == 1
        && parts[1].trim().parse::<u32>().is_ok()
        && parts[2].trim().parse::<u32>().is_ok()
}

/// Gateway host: the `gateway` attribute whenever the key is present (even
/// empty), otherwise the first comma-terminated element of `path`.
pub(crate) fn get_gateway(attrs: &Attrs) -> Option<String> {
    if let Some(gateway) = attrs.get("gateway") {
        return Some(gateway.to_owned());
    }

    let path = attrs.get("path")?;
    let comma = path.find(',')?;

    Some(path[..comma].to_owned())
}

/// Classify the tag by cpu family, DH+ usage, grouping and messaging
/// variant. Combinations outside the table are parameter errors.
pub(crate) fn determine_kind(attrs: &Attrs) -> Result<TagKind, Status> {
    let cpu = cpu_type(attrs)?;
    let uses_dhp = check_dhp(attrs);
    let is_implicit = attrs.get_str("protocol", "").eq_ignore_ascii_case("ab_io");
    let is_group = attrs.has("read_group");

    match cpu {
        CpuType::Plc5 => {
            if is_implicit || is_group {
                return Err(Status::BadParam);
            }

            if uses_dhp {
                Ok(TagKind::PcccDhp)
            } else {
                Ok(TagKind::Pccc)
            }
        }

        CpuType::Mlgx => {
            if is_implicit || is_group || uses_dhp {
                return Err(Status::BadParam);
            }

            Ok(TagKind::Pccc)
        }

        CpuType::Lgx => {
            if is_implicit && is_group {
                return Err(Status::BadParam);
            }

            if is_group {
                Ok(TagKind::Group)
            } else if is_implicit {
                Ok(TagKind::Implicit)
            } else {
                Ok(TagKind::Explicit)
            }
        }

        CpuType::M800 => Err(Status::BadParam),
    }
}

/// Create the protocol back end for an AB tag. Only the explicit sub-type
/// is live; the others are recognized and recorded as unsupported.
pub(crate) fn create_backend(tag: &Arc<TagInner>) -> Status {
    match determine_kind(&tag.attrs) {
        Ok(TagKind::Explicit) => {
            logging::debug!(tag.log, "creating explicit tag");
            explicit::create(tag, CpuType::Lgx)
        }
        Ok(kind) => {
            logging::debug!(tag.log, "unsupported tag sub-type"; "kind" => ?kind);
            tag.set_status(Status::BadParam);
            Status::BadParam
        }
        Err(status) => {
            logging::debug!(tag.log, "unable to classify tag"; "status" => %status);
            tag.set_status(status);
            status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(s: &str) -> Attrs {
        Attrs::parse(s).unwrap()
    }

    #[test]
    fn test_cpu_aliases() {
        for alias in &["plc", "PLC5", "slc", "slc500"] {
            let a = attrs(&format!("cpu={}", alias));
            assert_eq!(cpu_type(&a).unwrap(), CpuType::Plc5);
        }

        for alias in &["micrologix", "mlgx"] {
            let a = attrs(&format!("cpu={}", alias));
            assert_eq!(cpu_type(&a).unwrap(), CpuType::Mlgx);
        }

        for alias in &["micro800", "m800"] {
            let a = attrs(&format!("cpu={}", alias));
            assert_eq!(cpu_type(&a).unwrap(), CpuType::M800);
        }

        let logix = &[
            "lgx",
            "clgx",
            "compactlogix",
            "controllogix",
            "contrologix",
            "flexlogix",
            "flgx",
            "CompactLogix",
        ];
        for alias in logix {
            let a = attrs(&format!("cpu={}", alias));
            assert_eq!(cpu_type(&a).unwrap(), CpuType::Lgx);
        }
    }

    #[test]
    fn test_unknown_cpu() {
        assert_eq!(
            cpu_type(&attrs("cpu=plc3")).unwrap_err(),
            Status::BadDevice
        );
        assert_eq!(cpu_type(&attrs("name=x")).unwrap_err(), Status::BadDevice);
    }

    #[test]
    fn test_check_dhp_last_element() {
        assert!(check_dhp(&attrs("path=1,0,A:1:5")));
        assert!(check_dhp(&attrs("path=1,B:2:7")));
        assert!(!check_dhp(&attrs("path=1,0")));
        assert!(!check_dhp(&attrs("path=A:1:5,0")));
        // A bare triple with no preceding hop is not a DH+ bridge.
        assert!(!check_dhp(&attrs("path=A:1:5")));
        assert!(!check_dhp(&attrs("name=x")));
    }

    #[test]
    fn test_gateway_attribute_wins() {
        let a = attrs("gateway=10.0.0.1&path=192.168.1.9,1,0");
        assert_eq!(get_gateway(&a).unwrap(), "10.0.0.1");
    }

    #[test]
    fn test_gateway_present_but_empty_is_used() {
        // A present key wins even with an empty value; no path fallback.
        let a = attrs("gateway=&path=192.168.1.9,1,0");
        assert_eq!(get_gateway(&a).unwrap(), "");
    }

    #[test]
    fn test_gateway_from_path_with_leading_comma_is_empty() {
        let a = attrs("path=,1,0");
        assert_eq!(get_gateway(&a).unwrap(), "");
    }

    #[test]
    fn test_gateway_falls_back_to_path_head() {
        let a = attrs("path=192.168.1.9,1,0");
        assert_eq!(get_gateway(&a).unwrap(), "192.168.1.9");
    }

    #[test]
    fn test_gateway_missing() {
        assert_eq!(get_gateway(&attrs("name=x")), None);
        // No comma in the path means no extractable host.
        assert_eq!(get_gateway(&attrs("path=justonehop")), None);
    }

    #[test]
    fn test_dispatch_table() {
        // PLC5 with DH+ in the path
        assert_eq!(
            determine_kind(&attrs("cpu=plc5&path=1,0,A:1:5")).unwrap(),
            TagKind::PcccDhp
        );
        // PLC5 plain
        assert_eq!(
            determine_kind(&attrs("cpu=plc5&path=1,0")).unwrap(),
            TagKind::Pccc
        );
        // MicroLogix
        assert_eq!(
            determine_kind(&attrs("cpu=mlgx&path=1,0")).unwrap(),
            TagKind::Pccc
        );
        // Logix grouping
        assert_eq!(
            determine_kind(&attrs("cpu=lgx&read_group=g1")).unwrap(),
            TagKind::Group
        );
        // Logix implicit messaging
        assert_eq!(
            determine_kind(&attrs("cpu=lgx&protocol=ab_io")).unwrap(),
            TagKind::Implicit
        );
        // Logix explicit messaging
        assert_eq!(
            determine_kind(&attrs("cpu=lgx&protocol=ab_eip")).unwrap(),
            TagKind::Explicit
        );
    }

    #[test]
    fn test_dispatch_rejects_bad_combinations() {
        // PLC5 cannot group or use implicit messaging
        assert_eq!(
            determine_kind(&attrs("cpu=plc5&read_group=g")).unwrap_err(),
            Status::BadParam
        );
        assert_eq!(
            determine_kind(&attrs("cpu=plc5&protocol=ab_io")).unwrap_err(),
            Status::BadParam
        );
        // MicroLogix cannot bridge DH+
        assert_eq!(
            determine_kind(&attrs("cpu=mlgx&path=1,0,A:1:5")).unwrap_err(),
            Status::BadParam
        );
        // Logix cannot be both grouped and implicit
        assert_eq!(
            determine_kind(&attrs("cpu=lgx&protocol=ab_io&read_group=g")).unwrap_err(),
            Status::BadParam
        );
        // Micro800 is recognized but has no live sub-type
        assert_eq!(
            determine_kind(&attrs("cpu=m800")).unwrap_err(),
            Status::BadParam
        );
    }

    #[test]
    fn test_stub_subtypes_record_bad_param() {
        let tag = Arc::new(TagInner::new(
            attrs("cpu=plc5&path=1,0&protocol=ab_eip&name=N7:0"),
            crate::logging::discard(),
        ));

        assert_eq!(create_backend(&tag), Status::BadParam);
        assert_eq!(tag.status(), Status::BadParam);
        assert!(!tag.state().backend_started);
    }
}
