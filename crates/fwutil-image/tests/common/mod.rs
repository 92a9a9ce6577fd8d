//! Fixture builders shared by the integration tests.

use fwutil_image::checksum::{crc32, md5, sha256};
use fwutil_image::prelude::*;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

/// A U-Boot legacy image: 64-byte header followed by `payload`.
pub fn legacy_image(payload: &[u8]) -> Vec<u8> {
    let mut header = vec![0u8; LEGACY_HEADER_LEN];
    put_u32(&mut header, 0, LEGACY_MAGIC);
    put_u32(&mut header, 12, payload.len() as u32);
    put_u32(&mut header, 24, crc32(payload));
    header.splice(32..38, b"kernel".iter().copied());
    let hcrc = crc32(&header);
    put_u32(&mut header, 4, hcrc);
    header.extend_from_slice(payload);
    header
}

pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    if let Some(field) = buf.get_mut(offset..offset + 4) {
        field.copy_from_slice(&value.to_be_bytes());
    }
}

/// Writes a flattened device tree the way `dtc` lays it out.
#[derive(Default)]
pub struct FdtBuilder {
    structure: Vec<u8>,
    strings: Vec<u8>,
}

impl FdtBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn token(&mut self, token: u32) {
        self.structure.extend_from_slice(&token.to_be_bytes());
    }

    fn pad(&mut self) {
        while self.structure.len() % 4 != 0 {
            self.structure.push(0);
        }
    }

    fn string_offset(&mut self, name: &str) -> u32 {
        let mut needle = name.as_bytes().to_vec();
        needle.push(0);
        if let Some(pos) = self
            .strings
            .windows(needle.len())
            .position(|w| w == needle.as_slice())
        {
            return pos as u32;
        }
        let pos = self.strings.len() as u32;
        self.strings.extend_from_slice(&needle);
        pos
    }

    pub fn begin(&mut self, name: &str) -> &mut Self {
        self.token(1);
        self.structure.extend_from_slice(name.as_bytes());
        self.structure.push(0);
        self.pad();
        self
    }

    pub fn end(&mut self) -> &mut Self {
        self.token(2);
        self
    }

    pub fn prop(&mut self, name: &str, value: &[u8]) -> &mut Self {
        let name_offset = self.string_offset(name);
        self.token(3);
        self.structure
            .extend_from_slice(&(value.len() as u32).to_be_bytes());
        self.structure.extend_from_slice(&name_offset.to_be_bytes());
        self.structure.extend_from_slice(value);
        self.pad();
        self
    }

    pub fn prop_u32(&mut self, name: &str, value: u32) -> &mut Self {
        self.prop(name, &value.to_be_bytes())
    }

    pub fn prop_str(&mut self, name: &str, value: &str) -> &mut Self {
        let mut bytes = value.as_bytes().to_vec();
        bytes.push(0);
        self.prop(name, &bytes)
    }

    pub fn finish(&mut self) -> Vec<u8> {
        self.token(9);
        let off_struct = 40u32 + 16; // header + empty reserve map
        let off_strings = off_struct + self.structure.len() as u32;
        let total = off_strings + self.strings.len() as u32;
        let mut blob = Vec::with_capacity(total as usize);
        for word in [
            0xd00d_feed,
            total,
            off_struct,
            off_strings,
            40,
            17,
            16,
            0,
            self.strings.len() as u32,
            self.structure.len() as u32,
        ] {
            blob.extend_from_slice(&u32::to_be_bytes(word));
        }
        blob.extend_from_slice(&[0u8; 16]);
        blob.extend_from_slice(&self.structure);
        blob.extend_from_slice(&self.strings);
        blob
    }
}

/// How image payloads are stored in a generated FIT.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FitData {
    Inline,
    External,
}

/// A FIT with one image node per payload, each hashed with SHA-256.
pub fn fit_image(payloads: &[&[u8]], layout: FitData) -> Vec<u8> {
    fit_image_with(payloads, layout, |_, _| {})
}

/// As [`fit_image`], with a hook to add properties to each `hash@1` node.
pub fn fit_image_with(
    payloads: &[&[u8]],
    layout: FitData,
    hash_hook: impl Fn(usize, &mut FdtBuilder),
) -> Vec<u8> {
    // Positions do not change the tree size, so build once to learn where
    // external data starts and again with the real positions.
    let probe = build_fit(payloads, layout, 0, &hash_hook);
    let data_start = (probe.len() + 3) & !3;
    let mut blob = build_fit(payloads, layout, data_start as u32, &hash_hook);
    if layout == FitData::External {
        blob.resize(data_start, 0);
        for payload in payloads {
            blob.extend_from_slice(payload);
            while blob.len() % 4 != 0 {
                blob.push(0);
            }
        }
    }
    blob
}

fn build_fit(
    payloads: &[&[u8]],
    layout: FitData,
    data_start: u32,
    hash_hook: &impl Fn(usize, &mut FdtBuilder),
) -> Vec<u8> {
    let mut fdt = FdtBuilder::new();
    fdt.begin("");
    fdt.prop_str("description", "test FIT");
    fdt.begin("images");
    let mut position = data_start;
    for (index, payload) in payloads.iter().enumerate() {
        fdt.begin(&format!("image@{}", index + 1));
        fdt.prop_str("type", "kernel");
        match layout {
            FitData::Inline => {
                fdt.prop("data", payload);
            }
            FitData::External => {
                fdt.prop_u32("data-position", position);
                fdt.prop_u32("data-size", payload.len() as u32);
                position += ((payload.len() + 3) & !3) as u32;
            }
        }
        fdt.begin("hash@1");
        // Hook properties come first so they shadow the defaults below.
        hash_hook(index, &mut fdt);
        fdt.prop_str("algo", "sha256");
        fdt.prop("value", &sha256(payload));
        fdt.end();
        fdt.end();
    }
    fdt.end();
    fdt.begin("configurations");
    fdt.prop_str("default", "conf@1");
    fdt.begin("conf@1");
    fdt.prop_str("kernel", "image@1");
    fdt.end();
    fdt.end();
    fdt.end();
    fdt.finish()
}

pub fn target_header() -> SignedHeader {
    SignedHeader {
        project_name: "Yosemite V3.5".to_owned(),
        board_id: 0x03,
        stage_id: 2,
        component_id: 0x05,
        vendor_id: 0x01,
    }
}

/// `payload` followed by a correctly signed trailer for `header`.
pub fn signed_image(payload: &[u8], header: &SignedHeader) -> Vec<u8> {
    let trailer = SignedTrailer::new(header, md5(payload), b"v2023.12.01");
    let mut image = payload.to_vec();
    image.extend_from_slice(&trailer.encode());
    image
}

/// Write `bytes` to a fresh temporary file.
pub fn write_temp(bytes: &[u8]) -> std::io::Result<tempfile::NamedTempFile> {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(file)
}
