//! OpenCTM container decoding
//!
//! Layout (little endian): `OCTM`, version (5), compression method, vertex
//! count, triangle count, uv map count, attribute map count, flags and a
//! length-prefixed comment, followed by the body.
//!
//! RAW bodies are plain arrays. MG1 and MG2 bodies store every array LZMA
//! packed, with the bytes of its 32-bit values split into planes: most
//! significant byte first, then component, then element. MG2 additionally
//! stores vertices as integer offsets inside a uniform grid.

use std::io::{self, Cursor};

use byteorder::{LittleEndian, ReadBytesExt};

use crate::core::types::Vec3;
use super::ParseError;
use super::types::ParseCtmResult;

const MAGIC: &[u8; 4] = b"OCTM";
const FORMAT_VERSION: u32 = 5;

const METHOD_RAW: u32 = 0x0057_4152;
const METHOD_MG1: u32 = 0x0031_474d;
const METHOD_MG2: u32 = 0x0032_474d;

const FLAG_NORMALS: u32 = 0x0000_0001;

/// LZMA properties and dictionary size precede every packed stream. The
/// unpacked size is left out of the stream header.
const LZMA_PROPS_SIZE: usize = 5;

struct CtmReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> CtmReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { cursor: Cursor::new(data) }
    }

    fn offset(&self) -> usize {
        self.cursor.position() as usize
    }

    fn remaining(&self) -> usize {
        self.cursor.get_ref().len().saturating_sub(self.offset())
    }

    fn ensure(&self, needed: usize) -> Result<(), ParseError> {
        let available = self.remaining();
        if needed > available {
            return Err(ParseError::UnexpectedEof { offset: self.offset(), needed, available });
        }
        Ok(())
    }

    fn read<T>(
        &mut self,
        needed: usize,
        read: impl FnOnce(&mut Cursor<&'a [u8]>) -> io::Result<T>,
    ) -> Result<T, ParseError> {
        self.ensure(needed)?;
        let (offset, available) = (self.offset(), self.remaining());
        read(&mut self.cursor).map_err(|_| ParseError::UnexpectedEof { offset, needed, available })
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        self.ensure(len)?;
        let data: &'a [u8] = *self.cursor.get_ref();
        let start = self.offset();
        self.cursor.set_position((start + len) as u64);
        Ok(&data[start..start + len])
    }

    fn u32(&mut self) -> Result<u32, ParseError> {
        self.read(4, |c| c.read_u32::<LittleEndian>())
    }

    fn f32(&mut self) -> Result<f32, ParseError> {
        self.read(4, |c| c.read_f32::<LittleEndian>())
    }

    fn vec3(&mut self) -> Result<Vec3, ParseError> {
        Ok(Vec3::new(self.f32()?, self.f32()?, self.f32()?))
    }

    fn magic(&mut self, expected: &[u8; 4]) -> Result<(), ParseError> {
        let found = self.take(4)?;
        if found != expected {
            return Err(ParseError::BadMagic {
                expected: String::from_utf8_lossy(expected).into_owned(),
                found: String::from_utf8_lossy(found).into_owned(),
            });
        }
        Ok(())
    }

    fn string(&mut self) -> Result<String, ParseError> {
        let len = self.u32()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    fn u32s(&mut self, count: usize) -> Result<Vec<u32>, ParseError> {
        self.ensure(count.saturating_mul(4))?;
        let mut values = vec![0; count];
        self.read(count.saturating_mul(4), |c| c.read_u32_into::<LittleEndian>(&mut values))?;
        Ok(values)
    }

    fn f32s(&mut self, count: usize) -> Result<Vec<f32>, ParseError> {
        self.ensure(count.saturating_mul(4))?;
        let mut values = vec![0.0; count];
        self.read(count.saturating_mul(4), |c| c.read_f32_into::<LittleEndian>(&mut values))?;
        Ok(values)
    }

    fn packed_stream(&mut self) -> Result<&'a [u8], ParseError> {
        let packed_size = self.u32()? as usize;
        self.take(packed_size.saturating_add(LZMA_PROPS_SIZE))
    }

    /// Packed array of `count` elements with `stride` components each
    fn packed_u32s(&mut self, count: usize, stride: usize) -> Result<Vec<u32>, ParseError> {
        let stream = self.packed_stream()?;
        let unpacked_size = count.saturating_mul(stride).saturating_mul(4);

        let mut bytes = Vec::new();
        let options = lzma_rs::decompress::Options {
            unpacked_size: lzma_rs::decompress::UnpackedSize::UseProvided(Some(unpacked_size as u64)),
            ..Default::default()
        };
        lzma_rs::lzma_decompress_with_options(&mut Cursor::new(stream), &mut bytes, &options)
            .map_err(|e| ParseError::Decompress(e.to_string()))?;
        if bytes.len() != unpacked_size {
            return Err(ParseError::Decompress(format!(
                "unpacked {} bytes, expected {}", bytes.len(), unpacked_size
            )));
        }
        Ok(merge_byte_planes(&bytes, count, stride))
    }

    fn packed_f32s(&mut self, count: usize, stride: usize) -> Result<Vec<f32>, ParseError> {
        Ok(self.packed_u32s(count, stride)?.into_iter().map(f32::from_bits).collect())
    }
}

/// Reassemble values from byte planes. Byte `j` (0 = least significant) of
/// component `k` of element `i` sits at `i + (k + (3 - j) * stride) * count`.
fn merge_byte_planes(bytes: &[u8], count: usize, stride: usize) -> Vec<u32> {
    let len = count * stride;
    let mut values = vec![0u32; len];
    if len == 0 {
        return values;
    }
    for (plane, plane_bytes) in bytes.chunks_exact(len).enumerate() {
        let shift = 8 * (3 - plane as u32);
        for (pos, &byte) in plane_bytes.iter().enumerate() {
            let (component, element) = (pos / count, pos % count);
            values[element * stride + component] |= u32::from(byte) << shift;
        }
    }
    values
}

fn split_byte_planes(values: &[u32], stride: usize) -> Vec<u8> {
    let len = values.len();
    let count = len / stride.max(1);
    let mut bytes = vec![0u8; len * 4];
    for (pos, &value) in values.iter().enumerate() {
        let (element, component) = (pos / stride, pos % stride);
        for plane in 0..4 {
            bytes[plane * len + component * count + element] = (value >> (8 * (3 - plane))) as u8;
        }
    }
    bytes
}

/// Undo the MG1 index delta coding. The first index of a triangle is stored
/// relative to the previous triangle's first index; the second relative to
/// the previous triangle's second index when both share a first index, else
/// relative to its own first index; the third relative to its own first.
fn restore_indices(indices: &mut [u32]) {
    if indices.len() < 3 {
        return;
    }
    indices[1] = indices[1].wrapping_add(indices[0]);
    indices[2] = indices[2].wrapping_add(indices[0]);
    for i in (3..indices.len()).step_by(3) {
        indices[i] = indices[i].wrapping_add(indices[i - 3]);
        let base = if indices[i] == indices[i - 3] { indices[i - 2] } else { indices[i] };
        indices[i + 1] = indices[i + 1].wrapping_add(base);
        indices[i + 2] = indices[i + 2].wrapping_add(indices[i]);
    }
}

fn delta_indices(indices: &[u32]) -> Vec<u32> {
    let mut deltas = indices.to_vec();
    for i in (0..indices.len() - indices.len() % 3).step_by(3) {
        if i == 0 {
            deltas[1] = indices[1].wrapping_sub(indices[0]);
            deltas[2] = indices[2].wrapping_sub(indices[0]);
            continue;
        }
        deltas[i] = indices[i].wrapping_sub(indices[i - 3]);
        let base = if indices[i] == indices[i - 3] { indices[i - 2] } else { indices[i] };
        deltas[i + 1] = indices[i + 1].wrapping_sub(base);
        deltas[i + 2] = indices[i + 2].wrapping_sub(indices[i]);
    }
    deltas
}

#[derive(Debug)]
struct Header {
    method: u32,
    vertex_count: usize,
    triangle_count: usize,
    uv_map_count: usize,
    attr_map_count: usize,
    flags: u32,
}

impl Header {
    fn has_normals(&self) -> bool {
        self.flags & FLAG_NORMALS != 0
    }
}

fn read_header(r: &mut CtmReader<'_>) -> Result<Header, ParseError> {
    r.magic(MAGIC)?;
    let version = r.u32()?;
    if version != FORMAT_VERSION {
        return Err(ParseError::UnsupportedVersion(version));
    }
    let header = Header {
        method: r.u32()?,
        vertex_count: r.u32()? as usize,
        triangle_count: r.u32()? as usize,
        uv_map_count: r.u32()? as usize,
        attr_map_count: r.u32()? as usize,
        flags: r.u32()?,
    };
    let _comment = r.string()?;
    Ok(header)
}

fn read_raw(r: &mut CtmReader<'_>, header: &Header) -> Result<ParseCtmResult, ParseError> {
    r.magic(b"INDX")?;
    let indices = r.u32s(header.triangle_count * 3)?;

    r.magic(b"VERT")?;
    let vertices = r.f32s(header.vertex_count * 3)?;

    let normals = if header.has_normals() {
        r.magic(b"NORM")?;
        Some(r.f32s(header.vertex_count * 3)?)
    } else {
        None
    };

    // Texture coordinates and custom attributes are not used for rendering
    for _ in 0..header.uv_map_count {
        r.magic(b"TEXC")?;
        let _name = r.string()?;
        let _file_name = r.string()?;
        r.take(header.vertex_count * 2 * 4)?;
    }
    for _ in 0..header.attr_map_count {
        r.magic(b"ATTR")?;
        let _name = r.string()?;
        r.take(header.vertex_count * 4 * 4)?;
    }

    Ok(ParseCtmResult { indices, vertices, normals })
}

fn read_mg1(r: &mut CtmReader<'_>, header: &Header) -> Result<ParseCtmResult, ParseError> {
    r.magic(b"INDX")?;
    let mut indices = r.packed_u32s(header.triangle_count, 3)?;
    restore_indices(&mut indices);

    r.magic(b"VERT")?;
    let vertices = r.packed_f32s(header.vertex_count * 3, 1)?;

    let normals = if header.has_normals() {
        r.magic(b"NORM")?;
        Some(r.packed_f32s(header.vertex_count * 3, 1)?)
    } else {
        None
    };

    for _ in 0..header.uv_map_count {
        r.magic(b"TEXC")?;
        let _name = r.string()?;
        let _file_name = r.string()?;
        r.packed_stream()?;
    }
    for _ in 0..header.attr_map_count {
        r.magic(b"ATTR")?;
        let _name = r.string()?;
        r.packed_stream()?;
    }

    Ok(ParseCtmResult { indices, vertices, normals })
}

/// Uniform grid MG2 vertices are quantized against
struct VertexGrid {
    precision: f32,
    lower: Vec3,
    cell_size: Vec3,
    divisions: [u32; 3],
}

impl VertexGrid {
    fn read(r: &mut CtmReader<'_>) -> Result<Self, ParseError> {
        r.magic(b"MG2H")?;
        let precision = r.f32()?;
        let _normal_precision = r.f32()?;
        let lower = r.vec3()?;
        let upper = r.vec3()?;
        let divisions = [r.u32()?, r.u32()?, r.u32()?];
        if divisions.contains(&0) || divisions[0].checked_mul(divisions[1]).is_none() {
            return Err(ParseError::InvalidGeometry(format!("invalid MG2 grid divisions {:?}", divisions)));
        }
        let cell_size = (upper - lower) / Vec3::new(divisions[0] as f32, divisions[1] as f32, divisions[2] as f32);
        Ok(Self { precision, lower, cell_size, divisions })
    }

    fn cell_origin(&self, grid_index: u32) -> Vec3 {
        let [div_x, div_y, _] = self.divisions;
        let x = grid_index % div_x;
        let y = (grid_index / div_x) % div_y;
        let z = grid_index / (div_x * div_y);
        self.lower + Vec3::new(x as f32, y as f32, z as f32) * self.cell_size
    }

    /// Vertices from per-vertex grid cells and integer offsets. Consecutive
    /// vertices in one cell store x relative to the previous vertex.
    fn restore(&self, grid_indices: &[u32], offsets: &[u32]) -> Vec<f32> {
        let mut vertices = Vec::with_capacity(offsets.len());
        let mut previous: Option<(u32, u32)> = None;
        for (&grid_index, offset) in grid_indices.iter().zip(offsets.chunks_exact(3)) {
            let dx = match previous {
                Some((prev_index, prev_dx)) if prev_index == grid_index => offset[0].wrapping_add(prev_dx),
                _ => offset[0],
            };
            let local = Vec3::new(dx as f32, offset[1] as f32, offset[2] as f32) * self.precision;
            vertices.extend_from_slice(&(self.cell_origin(grid_index) + local).to_array());
            previous = Some((grid_index, dx));
        }
        vertices
    }
}

/// MG2 normals are predicted from the smoothed surface and are not restored;
/// meshes come back without normals, as if the flag were clear.
fn read_mg2(r: &mut CtmReader<'_>, header: &Header) -> Result<ParseCtmResult, ParseError> {
    let grid = VertexGrid::read(r)?;

    r.magic(b"VERT")?;
    let offsets = r.packed_u32s(header.vertex_count, 3)?;

    r.magic(b"GIDX")?;
    let mut grid_indices = r.packed_u32s(header.vertex_count, 1)?;
    for i in 1..grid_indices.len() {
        grid_indices[i] = grid_indices[i].wrapping_add(grid_indices[i - 1]);
    }

    r.magic(b"INDX")?;
    let mut indices = r.packed_u32s(header.triangle_count, 3)?;
    restore_indices(&mut indices);

    Ok(ParseCtmResult {
        indices,
        vertices: grid.restore(&grid_indices, &offsets),
        normals: None,
    })
}

/// Decode a CTM file into indices, positions and optional normals.
pub fn parse_ctm(bytes: &[u8]) -> Result<ParseCtmResult, ParseError> {
    let mut r = CtmReader::new(bytes);
    let header = read_header(&mut r)?;

    let mesh = match header.method {
        METHOD_RAW => read_raw(&mut r, &header)?,
        METHOD_MG1 => read_mg1(&mut r, &header)?,
        METHOD_MG2 => read_mg2(&mut r, &header)?,
        other => return Err(ParseError::UnsupportedCompression(format!("{:#010x}", other))),
    };

    if let Some(bad) = mesh.indices.iter().find(|&&i| i as usize >= header.vertex_count) {
        return Err(ParseError::InvalidGeometry(format!(
            "index {} out of range for {} vertices", bad, header.vertex_count
        )));
    }
    Ok(mesh)
}

fn header_bytes(method: u32, mesh: &ParseCtmResult) -> Vec<u8> {
    let flags = if mesh.normals.is_some() { FLAG_NORMALS } else { 0 };
    let mut out = MAGIC.to_vec();
    for v in [
        FORMAT_VERSION,
        method,
        mesh.vertex_count() as u32,
        mesh.triangle_count() as u32,
        0,
        0,
        flags,
        0,
    ] {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn write_packed(out: &mut Vec<u8>, values: &[u32], stride: usize) -> io::Result<()> {
    let mut stream = Vec::new();
    let options = lzma_rs::compress::Options {
        unpacked_size: lzma_rs::compress::UnpackedSize::SkipWritingToHeader,
    };
    lzma_rs::lzma_compress_with_options(&mut Cursor::new(split_byte_planes(values, stride)), &mut stream, &options)?;
    out.extend_from_slice(&(stream.len().saturating_sub(LZMA_PROPS_SIZE) as u32).to_le_bytes());
    out.extend_from_slice(&stream);
    Ok(())
}

/// Encode a mesh as a RAW CTM file.
pub fn encode_ctm_raw(mesh: &ParseCtmResult) -> Vec<u8> {
    let mut out = header_bytes(METHOD_RAW, mesh);
    out.extend_from_slice(b"INDX");
    out.extend(mesh.indices.iter().flat_map(|i| i.to_le_bytes()));
    out.extend_from_slice(b"VERT");
    out.extend(mesh.vertices.iter().flat_map(|v| v.to_le_bytes()));
    if let Some(normals) = &mesh.normals {
        out.extend_from_slice(b"NORM");
        out.extend(normals.iter().flat_map(|n| n.to_le_bytes()));
    }
    out
}

/// Encode a mesh as an LZMA packed MG1 CTM file.
pub fn encode_ctm_mg1(mesh: &ParseCtmResult) -> io::Result<Vec<u8>> {
    let bits = |floats: &[f32]| floats.iter().map(|f| f.to_bits()).collect::<Vec<_>>();

    let mut out = header_bytes(METHOD_MG1, mesh);
    out.extend_from_slice(b"INDX");
    write_packed(&mut out, &delta_indices(&mesh.indices), 3)?;
    out.extend_from_slice(b"VERT");
    write_packed(&mut out, &bits(&mesh.vertices), 1)?;
    if let Some(normals) = &mesh.normals {
        out.extend_from_slice(b"NORM");
        write_packed(&mut out, &bits(normals), 1)?;
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> ParseCtmResult {
        ParseCtmResult {
            indices: vec![0, 1, 2, 0, 2, 3],
            vertices: vec![0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 0.0],
            normals: Some(vec![0.0, 0.0, 1.0].repeat(4)),
        }
    }

    fn empty_header(method: u32) -> Vec<u8> {
        header_bytes(method, &ParseCtmResult::default())
    }

    fn packed(values: &[u32], stride: usize) -> Vec<u8> {
        let mut out = Vec::new();
        write_packed(&mut out, values, stride).unwrap();
        out
    }

    /// Three vertices in a 2x1x1 grid over [0,2]x[0,1]x[0,1] at precision 0.5
    fn mg2_triangle(divisions: [u32; 3]) -> Vec<u8> {
        let mesh = ParseCtmResult { indices: vec![0, 1, 2], vertices: vec![0.0; 9], normals: None };
        let mut out = header_bytes(METHOD_MG2, &mesh);
        out.extend_from_slice(b"MG2H");
        for f in [0.5f32, 0.0, 0.0, 0.0, 0.0, 2.0, 1.0, 1.0] {
            out.extend_from_slice(&f.to_le_bytes());
        }
        for d in divisions {
            out.extend_from_slice(&d.to_le_bytes());
        }
        out.extend_from_slice(b"VERT");
        out.extend(packed(&[2, 1, 2, 1, 0, 0, 2, 1, 1], 3));
        out.extend_from_slice(b"GIDX");
        out.extend(packed(&[0, 0, 1], 1));
        out.extend_from_slice(b"INDX");
        out.extend(packed(&[0, 1, 2], 3));
        out
    }

    #[test]
    fn test_decode_raw() {
        let mesh = quad();
        let decoded = parse_ctm(&encode_ctm_raw(&mesh)).unwrap();
        assert_eq!(decoded, mesh);
        assert_eq!(decoded.triangle_count(), 2);
        assert_eq!(decoded.vertex_count(), 4);
    }

    #[test]
    fn test_decode_without_normals() {
        let mesh = ParseCtmResult { normals: None, ..quad() };
        assert_eq!(parse_ctm(&encode_ctm_raw(&mesh)).unwrap().normals, None);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = encode_ctm_raw(&quad());
        bytes[0] = b'X';
        assert!(matches!(parse_ctm(&bytes), Err(ParseError::BadMagic { .. })));
    }

    #[test]
    fn test_truncated() {
        let bytes = encode_ctm_raw(&quad());
        let err = parse_ctm(&bytes[..bytes.len() - 5]).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_unknown_method_rejected() {
        assert_eq!(
            parse_ctm(&empty_header(0x1234)),
            Err(ParseError::UnsupportedCompression("0x00001234".into()))
        );
    }

    #[test]
    fn test_index_out_of_range() {
        let mesh = ParseCtmResult { indices: vec![0, 1, 9], ..quad() };
        assert!(matches!(parse_ctm(&encode_ctm_raw(&mesh)), Err(ParseError::InvalidGeometry(_))));
    }

    #[test]
    fn test_byte_planes_layout() {
        // One component: most significant bytes of both values come first
        let bytes = [0x01, 0x0a, 0x02, 0x0b, 0x03, 0x0c, 0x04, 0x0d];
        assert_eq!(merge_byte_planes(&bytes, 2, 1), vec![0x0102_0304, 0x0a0b_0c0d]);

        // Two components: within a plane, all first components then all second
        let mut bytes = vec![0u8; 16];
        bytes[12..].copy_from_slice(&[1, 3, 2, 4]);
        assert_eq!(merge_byte_planes(&bytes, 2, 2), vec![1, 2, 3, 4]);
        assert_eq!(split_byte_planes(&[1, 2, 3, 4], 2), bytes);
    }

    #[test]
    fn test_restore_indices() {
        let mut stored = vec![0, 1, 2, 0, 1, 3, 1, 2, 1];
        restore_indices(&mut stored);
        assert_eq!(stored, vec![0, 1, 2, 0, 2, 3, 1, 3, 2]);
        assert_eq!(delta_indices(&stored), vec![0, 1, 2, 0, 1, 3, 1, 2, 1]);
    }

    #[test]
    fn test_decode_mg1() {
        let mesh = ParseCtmResult { indices: vec![0, 1, 2, 0, 2, 3, 1, 3, 2], ..quad() };
        let bytes = encode_ctm_mg1(&mesh).unwrap();
        assert_eq!(parse_ctm(&bytes).unwrap(), mesh);

        let plain = ParseCtmResult { normals: None, ..mesh };
        assert_eq!(parse_ctm(&encode_ctm_mg1(&plain).unwrap()).unwrap(), plain);
    }

    #[test]
    fn test_mg1_truncated_stream() {
        let bytes = encode_ctm_mg1(&quad()).unwrap();
        let err = parse_ctm(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, ParseError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_decode_mg2() {
        let decoded = parse_ctm(&mg2_triangle([2, 1, 1])).unwrap();
        assert_eq!(decoded.indices, vec![0, 1, 2]);
        assert_eq!(decoded.normals, None);
        // The second vertex shares the first one's cell, so its x offset
        // accumulates onto the first's
        assert_eq!(decoded.vertices, vec![1.0, 0.5, 1.0, 1.5, 0.0, 0.0, 2.0, 0.5, 0.5]);
    }

    #[test]
    fn test_mg2_rejects_empty_grid() {
        assert!(matches!(parse_ctm(&mg2_triangle([2, 0, 1])), Err(ParseError::InvalidGeometry(_))));
    }
}
