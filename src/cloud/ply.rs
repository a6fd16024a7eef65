//! PLY point cloud reader/writer.
//!
//! Handles the two encodings the surrounding tooling produces: `ascii 1.0`
//! and `binary_little_endian 1.0`. Only the `vertex` element is consumed;
//! extra vertex properties (normals, confidence, ...) are strided over, and
//! elements declared after `vertex` (faces, edges) are ignored since their
//! data follows the vertex block.

use super::{CloudError, PointCloud};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use memmap2::Mmap;
use nalgebra::Point3;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Output encoding for [`write_ply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlyFormat {
    Ascii,
    BinaryLittleEndian,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScalarType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    F32,
    F64,
}

impl ScalarType {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "char" | "int8" => Some(Self::I8),
            "uchar" | "uint8" => Some(Self::U8),
            "short" | "int16" => Some(Self::I16),
            "ushort" | "uint16" => Some(Self::U16),
            "int" | "int32" => Some(Self::I32),
            "uint" | "uint32" => Some(Self::U32),
            "float" | "float32" => Some(Self::F32),
            "double" | "float64" => Some(Self::F64),
            _ => None,
        }
    }

    fn size(self) -> usize {
        match self {
            Self::I8 | Self::U8 => 1,
            Self::I16 | Self::U16 => 2,
            Self::I32 | Self::U32 => 4,
            Self::F32 => 4,
            Self::F64 => 8,
        }
    }
}

#[derive(Debug, Clone)]
struct Property {
    name: String,
    ty: ScalarType,
    /// Byte offset inside one binary vertex record.
    offset: usize,
}

struct Header {
    format: PlyFormat,
    vertex_count: usize,
    properties: Vec<Property>,
    stride: usize,
    /// Byte offset of the first data byte.
    data_start: usize,
}

/// Read a point cloud from a PLY file.
pub fn read_ply(path: &Path) -> Result<PointCloud, CloudError> {
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    decode(&mmap)
}

fn decode(bytes: &[u8]) -> Result<PointCloud, CloudError> {
    let header = parse_header(bytes)?;

    let position_props = find_positions(&header)?;
    let color_props = find_colors(&header);

    match header.format {
        PlyFormat::Ascii => decode_ascii(bytes, &header, &position_props, color_props.as_ref()),
        PlyFormat::BinaryLittleEndian => {
            decode_binary(bytes, &header, &position_props, color_props.as_ref())
        }
    }
}

/// Indices of the x/y/z properties, which must be float or double.
fn find_positions(header: &Header) -> Result<[usize; 3], CloudError> {
    let mut out = [usize::MAX; 3];
    for (idx, prop) in header.properties.iter().enumerate() {
        let slot = match prop.name.as_str() {
            "x" => 0,
            "y" => 1,
            "z" => 2,
            _ => continue,
        };
        if !matches!(prop.ty, ScalarType::F32 | ScalarType::F64) {
            return Err(CloudError::Unsupported(format!(
                "position property '{}' must be float or double",
                prop.name
            )));
        }
        out[slot] = idx;
    }
    if out.contains(&usize::MAX) {
        return Err(CloudError::Unsupported(
            "vertex element is missing x/y/z properties".to_string(),
        ));
    }
    Ok(out)
}

/// Indices of uchar red/green/blue, when all three are present.
fn find_colors(header: &Header) -> Option<[usize; 3]> {
    let mut out = [usize::MAX; 3];
    for (idx, prop) in header.properties.iter().enumerate() {
        let slot = match prop.name.as_str() {
            "red" => 0,
            "green" => 1,
            "blue" => 2,
            _ => continue,
        };
        if prop.ty == ScalarType::U8 {
            out[slot] = idx;
        }
    }
    if out.contains(&usize::MAX) {
        None
    } else {
        Some(out)
    }
}

fn parse_header(bytes: &[u8]) -> Result<Header, CloudError> {
    // The header is ASCII up to and including the `end_header` line.
    let header_end = find_header_end(bytes)?;
    let text = std::str::from_utf8(&bytes[..header_end]).map_err(|_| CloudError::Header {
        line: 0,
        message: "header is not valid ascii".to_string(),
    })?;

    let mut format = None;
    let mut vertex_count = None;
    let mut properties: Vec<Property> = Vec::new();
    let mut stride = 0usize;
    // Properties only belong to the vertex element while it is current.
    let mut in_vertex_element = false;
    let mut seen_any_element = false;

    for (idx, raw) in text.lines().enumerate() {
        let line_num = idx + 1;
        let line = raw.trim();
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["ply"] if line_num == 1 => {}
            _ if line_num == 1 => {
                return Err(CloudError::Header {
                    line: 1,
                    message: "missing 'ply' magic".to_string(),
                });
            }
            ["format", "ascii", "1.0"] => format = Some(PlyFormat::Ascii),
            ["format", "binary_little_endian", "1.0"] => {
                format = Some(PlyFormat::BinaryLittleEndian)
            }
            ["format", other, ..] => {
                return Err(CloudError::Unsupported(format!("ply format '{other}'")));
            }
            ["comment", ..] | ["obj_info", ..] => {}
            ["element", "vertex", count] => {
                if seen_any_element {
                    return Err(CloudError::Unsupported(
                        "vertex must be the first element".to_string(),
                    ));
                }
                seen_any_element = true;
                in_vertex_element = true;
                vertex_count = Some(count.parse::<usize>().map_err(|_| CloudError::Header {
                    line: line_num,
                    message: format!("invalid vertex count '{count}'"),
                })?);
            }
            ["element", ..] => {
                seen_any_element = true;
                in_vertex_element = false;
            }
            ["property", "list", ..] if in_vertex_element => {
                return Err(CloudError::Unsupported(
                    "list property on the vertex element".to_string(),
                ));
            }
            ["property", ty, name] if in_vertex_element => {
                let ty = ScalarType::parse(ty).ok_or_else(|| CloudError::Header {
                    line: line_num,
                    message: format!("unknown property type '{ty}'"),
                })?;
                properties.push(Property {
                    name: (*name).to_string(),
                    ty,
                    offset: stride,
                });
                stride += ty.size();
            }
            ["property", ..] => {}
            ["end_header"] => break,
            [] => {}
            _ => {
                return Err(CloudError::Header {
                    line: line_num,
                    message: format!("unrecognized header line '{line}'"),
                });
            }
        }
    }

    let format = format.ok_or(CloudError::Header {
        line: 0,
        message: "missing format line".to_string(),
    })?;
    let vertex_count = vertex_count.ok_or(CloudError::Header {
        line: 0,
        message: "missing vertex element".to_string(),
    })?;

    Ok(Header {
        format,
        vertex_count,
        properties,
        stride,
        data_start: header_end,
    })
}

/// Byte offset just past the newline of the `end_header` line.
fn find_header_end(bytes: &[u8]) -> Result<usize, CloudError> {
    const MARKER: &[u8] = b"end_header";
    let mut pos = 0;
    while pos + MARKER.len() <= bytes.len() {
        if &bytes[pos..pos + MARKER.len()] == MARKER {
            for (i, &b) in bytes[pos..].iter().enumerate() {
                if b == b'\n' {
                    return Ok(pos + i + 1);
                }
            }
            break;
        }
        // Headers are short; a linear scan is fine.
        pos += 1;
    }
    Err(CloudError::Header {
        line: 0,
        message: "missing end_header".to_string(),
    })
}

fn decode_ascii(
    bytes: &[u8],
    header: &Header,
    positions: &[usize; 3],
    colors: Option<&[usize; 3]>,
) -> Result<PointCloud, CloudError> {
    let text = std::str::from_utf8(&bytes[header.data_start..]).map_err(|_| CloudError::Parse {
        vertex: 0,
        message: "ascii payload is not valid utf-8".to_string(),
    })?;

    let mut out_positions = Vec::with_capacity(header.vertex_count);
    let mut out_colors = colors.map(|_| Vec::with_capacity(header.vertex_count));

    let mut lines = text.lines().filter(|l| !l.trim().is_empty());
    for vertex in 0..header.vertex_count {
        let line = lines.next().ok_or(CloudError::Truncated {
            expected: header.vertex_count,
            actual: vertex,
        })?;
        let tokens: Vec<&str> = line.split_whitespace().collect();
        if tokens.len() < header.properties.len() {
            return Err(CloudError::Parse {
                vertex,
                message: format!(
                    "expected {} values, found {}",
                    header.properties.len(),
                    tokens.len()
                ),
            });
        }

        let scalar = |idx: usize| -> Result<f64, CloudError> {
            tokens[idx].parse::<f64>().map_err(|_| CloudError::Parse {
                vertex,
                message: format!("invalid number '{}'", tokens[idx]),
            })
        };

        out_positions.push(Point3::new(
            scalar(positions[0])?,
            scalar(positions[1])?,
            scalar(positions[2])?,
        ));
        if let (Some(out), Some(idx)) = (out_colors.as_mut(), colors) {
            let channel = |i: usize| -> Result<u8, CloudError> {
                tokens[idx[i]].parse::<u8>().map_err(|_| CloudError::Parse {
                    vertex,
                    message: format!("invalid color '{}'", tokens[idx[i]]),
                })
            };
            out.push([channel(0)?, channel(1)?, channel(2)?]);
        }
    }

    PointCloud::new(out_positions, out_colors)
}

fn decode_binary(
    bytes: &[u8],
    header: &Header,
    positions: &[usize; 3],
    colors: Option<&[usize; 3]>,
) -> Result<PointCloud, CloudError> {
    let payload = &bytes[header.data_start..];
    let needed = header.vertex_count * header.stride;
    if payload.len() < needed {
        return Err(CloudError::Truncated {
            expected: header.vertex_count,
            actual: payload.len() / header.stride.max(1),
        });
    }

    let mut out_positions = Vec::with_capacity(header.vertex_count);
    let mut out_colors = colors.map(|_| Vec::with_capacity(header.vertex_count));

    for vertex in 0..header.vertex_count {
        let record = &payload[vertex * header.stride..(vertex + 1) * header.stride];

        let scalar = |idx: usize| -> f64 {
            let prop = &header.properties[idx];
            match prop.ty {
                ScalarType::F32 => LittleEndian::read_f32(&record[prop.offset..]) as f64,
                ScalarType::F64 => LittleEndian::read_f64(&record[prop.offset..]),
                // find_positions only admits float/double.
                _ => unreachable!("position property type checked at header parse"),
            }
        };

        out_positions.push(Point3::new(
            scalar(positions[0]),
            scalar(positions[1]),
            scalar(positions[2]),
        ));
        if let (Some(out), Some(idx)) = (out_colors.as_mut(), colors) {
            out.push([
                record[header.properties[idx[0]].offset],
                record[header.properties[idx[1]].offset],
                record[header.properties[idx[2]].offset],
            ]);
        }
    }

    PointCloud::new(out_positions, out_colors)
}

/// Write a point cloud, positions as doubles and colors as uchar.
pub fn write_ply(path: &Path, cloud: &PointCloud, format: PlyFormat) -> Result<(), CloudError> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);

    let format_line = match format {
        PlyFormat::Ascii => "ascii",
        PlyFormat::BinaryLittleEndian => "binary_little_endian",
    };
    writeln!(writer, "ply")?;
    writeln!(writer, "format {format_line} 1.0")?;
    writeln!(writer, "element vertex {}", cloud.len())?;
    writeln!(writer, "property double x")?;
    writeln!(writer, "property double y")?;
    writeln!(writer, "property double z")?;
    if cloud.colors().is_some() {
        writeln!(writer, "property uchar red")?;
        writeln!(writer, "property uchar green")?;
        writeln!(writer, "property uchar blue")?;
    }
    writeln!(writer, "end_header")?;

    match format {
        PlyFormat::Ascii => {
            for (i, p) in cloud.positions().iter().enumerate() {
                write!(writer, "{} {} {}", p.x, p.y, p.z)?;
                if let Some(colors) = cloud.colors() {
                    let [r, g, b] = colors[i];
                    write!(writer, " {r} {g} {b}")?;
                }
                writeln!(writer)?;
            }
        }
        PlyFormat::BinaryLittleEndian => {
            for (i, p) in cloud.positions().iter().enumerate() {
                writer.write_f64::<LittleEndian>(p.x)?;
                writer.write_f64::<LittleEndian>(p.y)?;
                writer.write_f64::<LittleEndian>(p.z)?;
                if let Some(colors) = cloud.colors() {
                    writer.write_all(&colors[i])?;
                }
            }
        }
    }

    writer.flush()?;
    Ok(())
}
