//! Advertising and scan-response payload construction.
//!
//! AD structures are `[len][type][data...]`, `len` counting type + data.
//! Advertising data carries the flags and the complete 16-bit service
//! UUID list; the scan response carries the complete local name.

use heapless::Vec;

/// Legacy advertising PDU payload limit.
pub const MAX_AD_LEN: usize = 31;

pub const AD_TYPE_FLAGS: u8 = 0x01;
pub const AD_TYPE_UUID16_COMPLETE: u8 = 0x03;
pub const AD_TYPE_NAME_COMPLETE: u8 = 0x09;

/// LE General Discoverable | BR/EDR Not Supported.
pub const FLAGS_GENERAL_NO_BREDR: u8 = 0x06;

pub const UUID_AUTOMATION_IO: u16 = 0x1815;
pub const UUID_ENVIRONMENTAL_SENSING: u16 = 0x181A;
pub const UUID_BATTERY: u16 = 0x180F;

/// Services listed in the advertising packet.
pub const ADVERTISED_SERVICES: [u16; 3] =
    [UUID_AUTOMATION_IO, UUID_ENVIRONMENTAL_SENSING, UUID_BATTERY];

pub type AdPayload = Vec<u8, MAX_AD_LEN>;

/// The structure would not fit in the 31-byte payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PayloadFull;

fn push_structure(out: &mut AdPayload, ad_type: u8, data: &[u8]) -> Result<(), PayloadFull> {
    if out.len() + 2 + data.len() > MAX_AD_LEN {
        return Err(PayloadFull);
    }
    let _ = out.push(data.len() as u8 + 1);
    let _ = out.push(ad_type);
    let _ = out.extend_from_slice(data);
    Ok(())
}

/// Flags + complete list of 16-bit service UUIDs.
pub fn advertising_data(services: &[u16]) -> Result<AdPayload, PayloadFull> {
    let mut out = AdPayload::new();
    push_structure(&mut out, AD_TYPE_FLAGS, &[FLAGS_GENERAL_NO_BREDR])?;

    let mut uuids: Vec<u8, MAX_AD_LEN> = Vec::new();
    for uuid in services {
        uuids
            .extend_from_slice(&uuid.to_le_bytes())
            .map_err(|_| PayloadFull)?;
    }
    push_structure(&mut out, AD_TYPE_UUID16_COMPLETE, &uuids)?;
    Ok(out)
}

/// Complete local name.
pub fn scan_response_data(name: &str) -> Result<AdPayload, PayloadFull> {
    let mut out = AdPayload::new();
    push_structure(&mut out, AD_TYPE_NAME_COMPLETE, name.as_bytes())?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertising_data_layout() {
        let adv = advertising_data(&ADVERTISED_SERVICES).unwrap();
        assert_eq!(
            adv.as_slice(),
            &[0x02, 0x01, 0x06, 0x07, 0x03, 0x15, 0x18, 0x1A, 0x18, 0x0F, 0x18]
        );
    }

    #[test]
    fn scan_response_carries_name() {
        let sr = scan_response_data("envnode").unwrap();
        assert_eq!(sr[0], 8);
        assert_eq!(sr[1], AD_TYPE_NAME_COMPLETE);
        assert_eq!(&sr[2..], b"envnode");
    }

    #[test]
    fn oversized_name_is_rejected() {
        let name = "a-device-name-that-is-far-too-long";
        assert_eq!(scan_response_data(name), Err(PayloadFull));
        // 29 bytes of name + 2 header bytes is exactly the limit.
        assert!(scan_response_data(&name[..29]).is_ok());
    }

    #[test]
    fn too_many_services_rejected() {
        let services = [0x1800u16; 14];
        assert_eq!(advertising_data(&services), Err(PayloadFull));
    }
}
