// Record aggregation - turns one discovery response into a device record
//
// The records of a response arrive flat and unordered across tags. They are
// first grouped by tag, keeping arrival order inside each tag, and then
// folded into a `DeviceRecord`. The position of a port record inside its
// group is the port index.
//
// Grouping is by tag only. When several switches answer the same query
// their records land in the same groups; see `host_names`.

use std::collections::HashMap;
use std::net::Ipv4Addr;

use crate::nsdp::{LinkStatus, PortCounters, RawRecord, Tag};
use crate::sources::ScrapeError;

/// Records sharing one tag
///
/// Starts as `Single` and is promoted to `Many` when a second record with
/// the same tag arrives.
#[derive(Debug, Clone, PartialEq)]
pub enum Grouped {
    Single(RawRecord),
    Many(Vec<RawRecord>),
}

impl Grouped {
    fn push(&mut self, record: RawRecord) {
        let previous = std::mem::replace(self, Grouped::Many(Vec::new()));
        *self = match previous {
            Grouped::Single(first) => Grouped::Many(vec![first, record]),
            Grouped::Many(mut records) => {
                records.push(record);
                Grouped::Many(records)
            }
        };
    }

    /// Records in arrival order
    pub fn records(&self) -> &[RawRecord] {
        match self {
            Grouped::Single(record) => std::slice::from_ref(record),
            Grouped::Many(records) => records,
        }
    }
}

/// Groups records by tag, preserving arrival order within each tag
pub fn group(records: Vec<RawRecord>) -> HashMap<Tag, Grouped> {
    let mut grouped: HashMap<Tag, Grouped> = HashMap::new();

    for record in records {
        match grouped.get_mut(&record.tag()) {
            Some(existing) => existing.push(record),
            None => {
                grouped.insert(record.tag(), Grouped::Single(record));
            }
        }
    }

    grouped
}

/// Per-switch state rebuilt from every response
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub name: String,
    pub address: Option<Ipv4Addr>,
    /// Link state per port, indexed by port position
    pub link_status: Vec<LinkStatus>,
    /// Traffic counters per port, indexed by port position
    pub statistics: Vec<PortCounters>,
}

/// Every non-empty host name in the response, in arrival order
///
/// More than one entry means several switches answered and their port
/// records are interleaved.
pub fn host_names(grouped: &HashMap<Tag, Grouped>) -> Vec<&str> {
    grouped
        .get(&Tag::HostName)
        .map(Grouped::records)
        .unwrap_or_default()
        .iter()
        .filter_map(|record| match record {
            RawRecord::HostName(name) if !name.is_empty() => Some(name.as_str()),
            _ => None,
        })
        .collect()
}

/// Folds grouped records into one device record
///
/// The first host name and the first address win.
///
/// # Errors
/// `Protocol` when no usable host name was returned; the error names the
/// device by its address.
pub fn fold(grouped: &HashMap<Tag, Grouped>) -> Result<DeviceRecord, ScrapeError> {
    let mut name: Option<&str> = None;
    let mut address = None;
    let mut link_status = Vec::new();
    let mut statistics = Vec::new();

    for records in grouped.values() {
        for record in records.records() {
            match record {
                RawRecord::HostName(host) => {
                    if name.is_none() && !host.is_empty() {
                        name = Some(host);
                    }
                }
                RawRecord::HostIp(ip) => {
                    address.get_or_insert(*ip);
                }
                RawRecord::PortLinkStatus(status) => link_status.push(*status),
                RawRecord::PortStatistics(counters) => statistics.push(*counters),
            }
        }
    }

    let Some(name) = name else {
        let device = address
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        return Err(ScrapeError::protocol(device, "switch is not returning a host name"));
    };

    Ok(DeviceRecord {
        name: name.to_string(),
        address,
        link_status,
        statistics,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(speed: u8) -> RawRecord {
        RawRecord::PortLinkStatus(LinkStatus { speed, flags: 1 })
    }

    #[test]
    fn test_ports_keep_arrival_order() {
        let grouped = group(vec![
            link(5),
            RawRecord::HostName("sw1".to_string()),
            link(0),
        ]);

        let device = fold(&grouped).unwrap();

        assert_eq!(device.name, "sw1");
        assert_eq!(device.link_status.len(), 2);
        assert_eq!(device.link_status[0].speed, 5);
        assert_eq!(device.link_status[1].speed, 0);
        assert!(device.statistics.is_empty());
        assert_eq!(device.address, None);
    }

    #[test]
    fn test_second_record_promotes_to_sequence() {
        let grouped = group(vec![RawRecord::HostName("sw1".to_string()), link(1)]);
        assert!(matches!(grouped[&Tag::PortLinkStatus], Grouped::Single(_)));

        let grouped = group(vec![link(1), link(2), link(3)]);
        match &grouped[&Tag::PortLinkStatus] {
            Grouped::Many(records) => assert_eq!(records, &vec![link(1), link(2), link(3)]),
            other => panic!("expected a sequence, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_name_is_a_protocol_error() {
        let grouped = group(vec![
            RawRecord::HostIp(Ipv4Addr::new(10, 0, 0, 2)),
            RawRecord::HostName(String::new()),
            link(5),
        ]);

        let err = fold(&grouped).unwrap_err();
        assert!(matches!(err, ScrapeError::Protocol { ref device, .. } if device == "10.0.0.2"));
        assert!(host_names(&grouped).is_empty());

        let err = fold(&group(vec![link(5)])).unwrap_err();
        assert!(matches!(err, ScrapeError::Protocol { ref device, .. } if device == "unknown"));
    }

    #[test]
    fn test_interleaved_devices_use_first_name() {
        let grouped = group(vec![
            RawRecord::HostName("sw1".to_string()),
            link(5),
            RawRecord::HostName("sw2".to_string()),
            link(4),
        ]);

        assert_eq!(host_names(&grouped), vec!["sw1", "sw2"]);

        let device = fold(&grouped).unwrap();
        assert_eq!(device.name, "sw1");
        assert_eq!(device.link_status.len(), 2);
    }
}
