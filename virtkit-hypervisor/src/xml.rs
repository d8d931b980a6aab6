//! Domain XML configuration: decoding live descriptors into [`DomainConfig`]
//! and building descriptors for new domains.
//!
//! The decoder is a deliberately small scanner over the subset of the domain
//! document this control plane consumes (memory, vcpu, os type, interfaces,
//! disks). It has no side effects and fails with `Error::Decode` on malformed
//! or missing required fields.

use virtkit_common::{
    DeviceList, DiskConfig, DomainConfig, Error, InterfaceConfig, OsType, Result,
};

/// One matched element: its attribute text and, unless self-closing, its body.
struct Tag<'a> {
    attrs: &'a str,
    body: Option<&'a str>,
    /// Byte offset just past the element, for scanning repeated elements.
    end: usize,
}

/// Find the first `<name ...>` element in `xml`. The character after the
/// element name must be a delimiter so `<memory` does not match
/// `<memoryBacking`.
fn find_tag<'a>(xml: &'a str, name: &str) -> Option<Tag<'a>> {
    let open = format!("<{name}");
    let mut search_from = 0;
    loop {
        let rel = xml[search_from..].find(&open)?;
        let start = search_from + rel;
        let after = start + open.len();
        match xml[after..].chars().next() {
            Some(c) if c == '>' || c == '/' || c.is_whitespace() => {
                let gt_rel = xml[after..].find('>')?;
                let gt = after + gt_rel;
                let attrs = xml[after..gt].trim_end_matches('/').trim();
                if xml[..gt].ends_with('/') {
                    return Some(Tag {
                        attrs,
                        body: None,
                        end: gt + 1,
                    });
                }
                let close = format!("</{name}>");
                let close_rel = xml[gt + 1..].find(&close)?;
                let close_at = gt + 1 + close_rel;
                return Some(Tag {
                    attrs,
                    body: Some(&xml[gt + 1..close_at]),
                    end: close_at + close.len(),
                });
            }
            _ => {
                // Prefix of a longer element name; keep scanning.
                search_from = after;
            }
        }
    }
}

/// Text content of the first `<name>` element.
fn tag_body<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    find_tag(xml, name).and_then(|t| t.body).map(str::trim)
}

/// Value of `key='...'` (or double-quoted) within an attribute string.
fn attr(attrs: &str, key: &str) -> Option<String> {
    for quote in ['\'', '"'] {
        let pat = format!("{key}={quote}");
        let mut from = 0;
        while let Some(rel) = attrs[from..].find(&pat) {
            let at = from + rel;
            let preceded_ok = at == 0
                || attrs[..at]
                    .chars()
                    .next_back()
                    .is_some_and(|c| c.is_whitespace());
            if preceded_ok {
                let val_start = at + pat.len();
                let val_end = attrs[val_start..].find(quote)?;
                return Some(attrs[val_start..val_start + val_end].to_string());
            }
            from = at + pat.len();
        }
    }
    None
}

/// All bodies of repeated `<name>...</name>` elements, in document order.
fn repeated<'a>(mut xml: &'a str, name: &str) -> Vec<Tag<'a>> {
    let mut out = Vec::new();
    while let Some(tag) = find_tag(xml, name) {
        let end = tag.end;
        out.push(tag);
        xml = &xml[end..];
    }
    out
}

/// Normalize a libvirt memory element to MiB. libvirt defaults to KiB when no
/// unit attribute is present.
fn to_mib(value: u64, unit: &str) -> Result<u64> {
    match unit {
        "b" | "bytes" => Ok(value / (1024 * 1024)),
        "KiB" => Ok(value / 1024),
        "MiB" => Ok(value),
        "GiB" => Ok(value * 1024),
        "TiB" => Ok(value * 1024 * 1024),
        other => Err(Error::Decode(format!("unsupported memory unit '{other}'"))),
    }
}

fn memory_element(xml: &str, name: &str) -> Result<Option<u64>> {
    let Some(tag) = find_tag(xml, name) else {
        return Ok(None);
    };
    let body = tag
        .body
        .map(str::trim)
        .filter(|b| !b.is_empty())
        .ok_or_else(|| Error::Decode(format!("<{name}> has no value")))?;
    let value: u64 = body
        .parse()
        .map_err(|_| Error::Decode(format!("<{name}> value '{body}' is not an integer")))?;
    let unit = attr(tag.attrs, "unit").unwrap_or_else(|| "KiB".to_string());
    Ok(Some(to_mib(value, &unit)?))
}

/// Decode a domain XML descriptor into the structured fields this control
/// plane consumes. Pure; no transport access.
pub fn decode_domain_xml(xml: &str) -> Result<DomainConfig> {
    let name = tag_body(xml, "name")
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::Decode("missing <name>".into()))?
        .to_string();

    let memory_mib =
        memory_element(xml, "memory")?.ok_or_else(|| Error::Decode("missing <memory>".into()))?;
    let current_memory_mib = memory_element(xml, "currentMemory")?.unwrap_or(memory_mib);

    let vcpu_body =
        tag_body(xml, "vcpu").ok_or_else(|| Error::Decode("missing <vcpu>".into()))?;
    let vcpus: u32 = vcpu_body
        .parse()
        .map_err(|_| Error::Decode(format!("<vcpu> value '{vcpu_body}' is not an integer")))?;

    let os_block = find_tag(xml, "os")
        .and_then(|t| t.body)
        .ok_or_else(|| Error::Decode("missing <os>".into()))?;
    let os_tag = find_tag(os_block, "type")
        .ok_or_else(|| Error::Decode("missing <os><type>".into()))?;
    let os_type = OsType {
        arch: attr(os_tag.attrs, "arch"),
        machine: attr(os_tag.attrs, "machine"),
        kind: os_tag
            .body
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| Error::Decode("<os><type> has no value".into()))?
            .to_string(),
    };

    let mut devices = DeviceList::default();
    if let Some(devices_block) = find_tag(xml, "devices").and_then(|t| t.body) {
        for iface in repeated(devices_block, "interface") {
            let Some(body) = iface.body else { continue };
            devices.interfaces.push(InterfaceConfig {
                mac: find_tag(body, "mac").and_then(|t| attr(t.attrs, "address")),
                network: find_tag(body, "source").and_then(|t| attr(t.attrs, "network")),
                model: find_tag(body, "model").and_then(|t| attr(t.attrs, "type")),
            });
        }
        for disk in repeated(devices_block, "disk") {
            let Some(body) = disk.body else { continue };
            let target = find_tag(body, "target");
            devices.disks.push(DiskConfig {
                source_file: find_tag(body, "source").and_then(|t| attr(t.attrs, "file")),
                target_dev: target.as_ref().and_then(|t| attr(t.attrs, "dev")),
                target_bus: target.as_ref().and_then(|t| attr(t.attrs, "bus")),
            });
        }
    }

    Ok(DomainConfig {
        name,
        memory_mib,
        current_memory_mib,
        vcpus,
        os_type,
        devices,
    })
}

/// Build the fixed-topology domain descriptor for a new VM: one virtio NIC on
/// the given network, one virtio raw root disk, one IDE CD-ROM carrying the
/// cloud-init seed. The hypervisor assigns the interface MAC.
pub fn build_domain_xml(
    name: &str,
    memory_mib: u64,
    vcpus: u32,
    root_disk: &str,
    seed_iso: &str,
    network: &str,
) -> String {
    format!(
        r#"<domain type='kvm'>
  <name>{name}</name>
  <memory unit='MiB'>{memory_mib}</memory>
  <currentMemory unit='MiB'>{memory_mib}</currentMemory>
  <vcpu placement='static'>{vcpus}</vcpu>
  <os>
    <type arch='x86_64' machine='q35'>hvm</type>
    <boot dev='hd'/>
  </os>
  <features>
    <acpi/>
    <apic/>
  </features>
  <devices>
    <interface type='network'>
      <source network='{network}'/>
      <model type='virtio'/>
    </interface>
    <disk type='file' device='disk'>
      <driver name='qemu' type='raw'/>
      <source file='{root_disk}'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <disk type='file' device='cdrom'>
      <driver name='qemu' type='raw'/>
      <source file='{seed_iso}'/>
      <target dev='hdc' bus='ide'/>
    </disk>
  </devices>
</domain>
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<domain type='kvm' id='3'>
  <name>web-1</name>
  <uuid>4dea22b3-1d52-d8f3-2516-782e98ab3fa0</uuid>
  <memory unit='KiB'>2097152</memory>
  <currentMemory unit='KiB'>1048576</currentMemory>
  <vcpu placement='static'>2</vcpu>
  <os>
    <type arch='x86_64' machine='q35'>hvm</type>
    <boot dev='hd'/>
  </os>
  <memoryBacking>
    <hugepages/>
  </memoryBacking>
  <devices>
    <emulator>/usr/bin/qemu-system-x86_64</emulator>
    <disk type='file' device='disk'>
      <driver name='qemu' type='raw'/>
      <source file='/var/lib/libvirt/images/web-1.img'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    <interface type='network'>
      <mac address='52:54:00:6c:3c:01'/>
      <source network='default' bridge='virbr0'/>
      <model type='virtio'/>
    </interface>
  </devices>
</domain>
"#;

    #[test]
    fn decodes_full_domain_document() {
        let cfg = decode_domain_xml(SAMPLE).unwrap();
        assert_eq!(cfg.name, "web-1");
        assert_eq!(cfg.memory_mib, 2048);
        assert_eq!(cfg.current_memory_mib, 1024);
        assert_eq!(cfg.vcpus, 2);
        assert_eq!(cfg.os_type.kind, "hvm");
        assert_eq!(cfg.os_type.arch.as_deref(), Some("x86_64"));
        assert_eq!(cfg.os_type.machine.as_deref(), Some("q35"));

        assert_eq!(cfg.devices.interfaces.len(), 1);
        let iface = &cfg.devices.interfaces[0];
        assert_eq!(iface.mac.as_deref(), Some("52:54:00:6c:3c:01"));
        assert_eq!(iface.network.as_deref(), Some("default"));
        assert_eq!(iface.model.as_deref(), Some("virtio"));

        assert_eq!(cfg.devices.disks.len(), 1);
        let disk = &cfg.devices.disks[0];
        assert_eq!(
            disk.source_file.as_deref(),
            Some("/var/lib/libvirt/images/web-1.img")
        );
        assert_eq!(disk.target_dev.as_deref(), Some("vda"));
        assert_eq!(disk.target_bus.as_deref(), Some("virtio"));
    }

    #[test]
    fn memory_backing_element_does_not_shadow_memory() {
        // <memoryBacking> shares the <memory prefix; the scanner must not
        // treat it as the memory element.
        let cfg = decode_domain_xml(SAMPLE).unwrap();
        assert_eq!(cfg.memory_mib, 2048);
    }

    #[test]
    fn current_memory_defaults_to_memory() {
        let xml = r#"<domain><name>a</name><memory unit='MiB'>512</memory>
            <vcpu>1</vcpu><os><type>hvm</type></os></domain>"#;
        let cfg = decode_domain_xml(xml).unwrap();
        assert_eq!(cfg.current_memory_mib, 512);
    }

    #[test]
    fn unit_defaults_to_kib() {
        let xml = r#"<domain><name>a</name><memory>1048576</memory>
            <vcpu>1</vcpu><os><type>hvm</type></os></domain>"#;
        let cfg = decode_domain_xml(xml).unwrap();
        assert_eq!(cfg.memory_mib, 1024);
    }

    #[test]
    fn gib_unit_scales_up() {
        let xml = r#"<domain><name>a</name><memory unit='GiB'>2</memory>
            <vcpu>1</vcpu><os><type>hvm</type></os></domain>"#;
        let cfg = decode_domain_xml(xml).unwrap();
        assert_eq!(cfg.memory_mib, 2048);
    }

    #[test]
    fn missing_name_is_a_decode_error() {
        let xml = r#"<domain><memory unit='MiB'>512</memory><vcpu>1</vcpu>
            <os><type>hvm</type></os></domain>"#;
        assert!(matches!(decode_domain_xml(xml), Err(Error::Decode(_))));
    }

    #[test]
    fn missing_vcpu_is_a_decode_error() {
        let xml = r#"<domain><name>a</name><memory unit='MiB'>512</memory>
            <os><type>hvm</type></os></domain>"#;
        assert!(matches!(decode_domain_xml(xml), Err(Error::Decode(_))));
    }

    #[test]
    fn unknown_memory_unit_is_a_decode_error() {
        let xml = r#"<domain><name>a</name><memory unit='parsecs'>1</memory>
            <vcpu>1</vcpu><os><type>hvm</type></os></domain>"#;
        assert!(matches!(decode_domain_xml(xml), Err(Error::Decode(_))));
    }

    #[test]
    fn built_descriptor_decodes_to_requested_shape() {
        let xml = build_domain_xml(
            "ubuntu-abc123",
            2048,
            2,
            "/var/lib/libvirt/images/ubuntu-abc123.img",
            "/var/lib/libvirt/images/ubuntu-abc123.iso",
            "default",
        );
        let cfg = decode_domain_xml(&xml).unwrap();
        assert_eq!(cfg.name, "ubuntu-abc123");
        assert_eq!(cfg.memory_mib, 2048);
        assert_eq!(cfg.vcpus, 2);
        assert_eq!(cfg.devices.interfaces.len(), 1);
        assert_eq!(cfg.devices.interfaces[0].network.as_deref(), Some("default"));
        // Interface MAC is assigned by the hypervisor, so the descriptor
        // carries none yet.
        assert!(cfg.devices.interfaces[0].mac.is_none());
        assert_eq!(cfg.devices.disks.len(), 2);
        assert_eq!(cfg.devices.disks[1].target_bus.as_deref(), Some("ide"));
    }
}
