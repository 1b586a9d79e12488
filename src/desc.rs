//! USB descriptor layouts and the flat byte-slice walk every standard
//! GET_DESCRIPTOR / interface-lookup operation is built on.

/// `{bLength, bDescriptorType}` header shared by every descriptor type.
pub const DESC_TYPE_DEVICE: u8 = 1;
pub const DESC_TYPE_CONFIGURATION: u8 = 2;
pub const DESC_TYPE_STRING: u8 = 3;
pub const DESC_TYPE_INTERFACE: u8 = 4;
pub const DESC_TYPE_ENDPOINT: u8 = 5;
pub const DESC_TYPE_DEVICE_QUALIFIER: u8 = 6;
pub const DESC_TYPE_INTERFACE_ASSOCIATION: u8 = 11;

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct DeviceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub bcd_usb: u16,
    pub b_device_class: u8,
    pub b_device_sub_class: u8,
    pub b_device_protocol: u8,
    pub b_max_packet_size0: u8,
    pub id_vendor: u16,
    pub id_product: u16,
    pub bcd_device: u16,
    pub i_manufacturer: u8,
    pub i_product: u8,
    pub i_serial_number: u8,
    pub b_num_configurations: u8,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct ConfigurationDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub w_total_length: u16,
    pub b_num_interfaces: u8,
    pub b_configuration_value: u8,
    pub i_configuration: u8,
    pub bm_attributes: u8,
    pub b_max_power: u8,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct InterfaceDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_interface_number: u8,
    pub b_alternate_setting: u8,
    pub b_num_endpoints: u8,
    pub b_interface_class: u8,
    pub b_interface_sub_class: u8,
    pub b_interface_protocol: u8,
    pub i_interface: u8,
}

#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct EndpointDescriptor {
    pub b_length: u8,
    pub b_descriptor_type: u8,
    pub b_endpoint_address: u8,
    pub bm_attributes: u8,
    pub w_max_packet_size: u16,
    pub b_interval: u8,
}

/// The descriptor tables the application supplies at `init()` time.
/// `configurations` and `strings` are flat, already-serialised byte blobs
/// (a configuration descriptor followed immediately by its interface and
/// endpoint descriptors, per §6) so `Transfer::respond_static` can point
/// straight at them without a copy.
pub struct StackDescriptors {
    pub device: &'static [u8],
    pub device_qualifier: Option<&'static [u8]>,
    pub configurations: &'static [&'static [u8]],
    pub strings: &'static [&'static [u8]],
}

/// Read the common `{bLength, bDescriptorType}` header at the start of
/// `desc`, if it is long enough to hold one.
pub fn desc_header(desc: &[u8]) -> Option<(u8, u8)> {
    if desc.len() < 2 { return None; }
    Some((desc[0], desc[1]))
}

/// Step from one descriptor to the next inside a flat, concatenated
/// descriptor blob (a configuration descriptor's body). Returns `None` once
/// there isn't a full header left, or the declared length would run past
/// the end of `blob`.
pub fn desc_next<'a>(blob: &'a [u8], offset: usize) -> Option<(&'a [u8], usize)> {
    let rest = blob.get(offset..)?;
    let (len, _ty) = desc_header(rest)?;
    if len == 0 || offset + len as usize > blob.len() { return None; }
    Some((&rest[..len as usize], offset + len as usize))
}

/// Find the first descriptor of type `want` at or after `offset` inside a
/// flat descriptor blob.
pub fn desc_find(blob: &[u8], want: u8, mut offset: usize) -> Option<(&[u8], usize)> {
    while let Some((d, next)) = desc_next(blob, offset) {
        if d[1] == want { return Some((d, next)); }
        offset = next;
    }
    None
}

/// Find interface `number`, alternate setting `alt`, inside a configuration
/// blob. Mirrors the `_find_intf`/`_find_intf_alt` walk: scan for
/// INTERFACE descriptors and match both fields.
pub fn find_interface(blob: &[u8], number: u8, alt: u8) -> Option<&InterfaceDescriptor> {
    let mut offset = 0;
    while let Some((d, next)) = desc_find(blob, DESC_TYPE_INTERFACE, offset) {
        let intf = unsafe { &*(d.as_ptr() as *const InterfaceDescriptor) };
        if intf.b_interface_number == number && intf.b_alternate_setting == alt {
            return Some(intf);
        }
        offset = next;
    }
    None
}

/// Look up configuration blob `index` (1-based `bConfigurationValue`, not a
/// zero-based array index) among the application's configuration table.
pub fn desc_find_conf(stack: &StackDescriptors, value: u8) -> Option<&'static [u8]> {
    stack.configurations.iter().copied().find(|blob| {
        let hdr = unsafe { &*(blob.as_ptr() as *const ConfigurationDescriptor) };
        hdr.b_configuration_value == value
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> Vec<u8> {
        // config header (9) + interface 0 alt 0 (9) + interface 0 alt 1 (9)
        let mut v = Vec::new();
        v.extend_from_slice(&[9, DESC_TYPE_CONFIGURATION, 27, 0, 1, 1, 0, 0xc0, 50]);
        v.extend_from_slice(&[9, DESC_TYPE_INTERFACE, 0, 0, 0, 0xff, 0, 0, 0]);
        v.extend_from_slice(&[9, DESC_TYPE_INTERFACE, 0, 1, 0, 0xff, 0, 0, 0]);
        v
    }

    #[test]
    fn walks_every_descriptor_exactly_once() {
        let blob = sample_config();
        let mut count = 0;
        let mut offset = 0;
        while let Some((_, next)) = desc_next(&blob, offset) {
            count += 1;
            offset = next;
        }
        assert_eq!(count, 3);
    }

    #[test]
    fn finds_alternate_setting() {
        let blob = sample_config();
        let alt1 = find_interface(&blob, 0, 1).expect("alt 1 present");
        assert_eq!(alt1.b_alternate_setting, 1);
        assert!(find_interface(&blob, 0, 2).is_none());
    }

    #[test]
    fn truncated_blob_stops_the_walk() {
        let mut blob = sample_config();
        blob.truncate(20); // cuts the second interface descriptor short
        assert!(desc_next(&blob, 18).is_none());
    }
}
