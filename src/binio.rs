//! Little-endian primitives for the model file format.

use std::io::{self, Read, Write};

pub fn write_i32<W: Write>(w: &mut W, v: i32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_i32<R: Read>(r: &mut R) -> io::Result<i32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(i32::from_le_bytes(buf))
}

pub fn write_i64<W: Write>(w: &mut W, v: i64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_i64<R: Read>(r: &mut R) -> io::Result<i64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(i64::from_le_bytes(buf))
}

pub fn write_f32<W: Write>(w: &mut W, v: f32) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_f32<R: Read>(r: &mut R) -> io::Result<f32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(f32::from_le_bytes(buf))
}

pub fn write_f64<W: Write>(w: &mut W, v: f64) -> io::Result<()> {
    w.write_all(&v.to_le_bytes())
}

pub fn read_f64<R: Read>(r: &mut R) -> io::Result<f64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

pub fn write_u8<W: Write>(w: &mut W, v: u8) -> io::Result<()> {
    w.write_all(&[v])
}

pub fn read_u8<R: Read>(r: &mut R) -> io::Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}

pub fn write_bool<W: Write>(w: &mut W, v: bool) -> io::Result<()> {
    write_u8(w, v as u8)
}

pub fn read_bool<R: Read>(r: &mut R) -> io::Result<bool> {
    Ok(read_u8(r)? != 0)
}

pub fn write_f32s<W: Write>(w: &mut W, v: &[f32]) -> io::Result<()> {
    w.write_all(bytemuck::cast_slice::<f32, u8>(v))
}

pub fn read_f32s<R: Read>(r: &mut R, v: &mut [f32]) -> io::Result<()> {
    r.read_exact(bytemuck::cast_slice_mut::<f32, u8>(v))
}

/// Writes the UTF-8 bytes of `s` followed by a NUL terminator.
pub fn write_str<W: Write>(w: &mut W, s: &str) -> io::Result<()> {
    w.write_all(s.as_bytes())?;
    write_u8(w, 0)
}

/// Reads bytes up to (and consuming) a NUL terminator.
pub fn read_str<R: Read>(r: &mut R) -> io::Result<String> {
    let mut bytes = Vec::new();
    loop {
        let b = read_u8(r)?;
        if b == 0 {
            break;
        }
        bytes.push(b);
    }
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips() {
        let mut buf = Vec::new();
        write_i32(&mut buf, -7).unwrap();
        write_i64(&mut buf, 1 << 40).unwrap();
        write_f32(&mut buf, 0.25).unwrap();
        write_f64(&mut buf, 1e-4).unwrap();
        write_bool(&mut buf, true).unwrap();
        write_str(&mut buf, "__label__x").unwrap();
        write_f32s(&mut buf, &[1.0, 2.0, 3.0]).unwrap();

        let mut r = Cursor::new(buf);
        assert_eq!(read_i32(&mut r).unwrap(), -7);
        assert_eq!(read_i64(&mut r).unwrap(), 1 << 40);
        assert_eq!(read_f32(&mut r).unwrap(), 0.25);
        assert_eq!(read_f64(&mut r).unwrap(), 1e-4);
        assert!(read_bool(&mut r).unwrap());
        assert_eq!(read_str(&mut r).unwrap(), "__label__x");
        let mut v = [0f32; 3];
        read_f32s(&mut r, &mut v).unwrap();
        assert_eq!(v, [1.0, 2.0, 3.0]);
    }
}
