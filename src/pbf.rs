//! Protocol buffer wire primitives.
//!
//! [`Pbf`] is a zero-copy cursor over an encoded buffer, dispatching fields to
//! a handler and skipping anything the handler leaves unread. [`PbfWriter`]
//! appends encoded fields to a growable buffer.

use byteorder::{ByteOrder, LittleEndian};
use smallvec::SmallVec;

use crate::{Error, Result};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum WireType {
    Varint = 0,
    Fixed64 = 1,
    Bytes = 2,
    Fixed32 = 5,
}

impl WireType {
    fn from_tag(tag: u64) -> Result<Self> {
        match tag & 0x7 {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::Fixed64),
            2 => Ok(WireType::Bytes),
            5 => Ok(WireType::Fixed32),
            t => Err(Error::UnknownWireType(t as u8)),
        }
    }
}

pub struct Pbf<'a> {
    buf: &'a [u8],
    pos: usize,
    wire_type: WireType,
}

impl<'a> Pbf<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Pbf {
            buf,
            pos: 0,
            wire_type: WireType::Varint,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn set_pos(&mut self, pos: usize) {
        self.pos = pos;
    }

    pub fn buffer(&self) -> &'a [u8] {
        self.buf
    }

    /// Wire type of the most recently read tag.
    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    /// Reads tagged fields until `end`, handing each one to `read_field`.
    /// Fields the handler does not consume are skipped.
    pub fn read_fields<T, F>(&mut self, end: usize, result: &mut T, mut read_field: F) -> Result<()>
    where
        F: FnMut(u32, &mut T, &mut Pbf<'a>) -> Result<()>,
    {
        if end > self.buf.len() {
            return Err(Error::UnexpectedEof);
        }

        while self.pos < end {
            let tag = self.read_varint()?;
            self.wire_type = WireType::from_tag(tag)?;
            let field = (tag >> 3) as u32;

            let start = self.pos;
            read_field(field, result, self)?;

            if self.pos == start {
                self.skip(self.wire_type)?;
            }
        }

        Ok(())
    }

    /// Reads a length delimited embedded message.
    pub fn read_message<T, F>(&mut self, result: &mut T, read_field: F) -> Result<()>
    where
        F: FnMut(u32, &mut T, &mut Pbf<'a>) -> Result<()>,
    {
        let end = self.read_length_end()?;
        self.read_fields(end, result, read_field)
    }

    fn next_byte(&mut self) -> Result<u8> {
        let b = *self.buf.get(self.pos).ok_or(Error::UnexpectedEof)?;
        self.pos += 1;
        Ok(b)
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(Error::UnexpectedEof)?;
        let bytes = self.buf.get(self.pos..end).ok_or(Error::UnexpectedEof)?;
        self.pos = end;
        Ok(bytes)
    }

    fn read_length_end(&mut self) -> Result<usize> {
        let len = self.read_varint()? as usize;
        let end = self.pos.checked_add(len).ok_or(Error::UnexpectedEof)?;
        if end > self.buf.len() {
            return Err(Error::UnexpectedEof);
        }
        Ok(end)
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let mut val = 0u64;
        for shift in [0, 7, 14, 21] {
            let b = self.next_byte()?;
            val |= ((b & 0x7f) as u64) << shift;
            if b < 0x80 {
                return Ok(val);
            }
        }

        self.read_varint_remainder(val)
    }

    fn read_varint_remainder(&mut self, mut val: u64) -> Result<u64> {
        let mut shift = 28;
        while shift < 70 {
            let b = self.next_byte()?;
            val |= ((b & 0x7f) as u64) << shift;
            if b < 0x80 {
                return Ok(val);
            }
            shift += 7;
        }

        Err(Error::VarintOverflow)
    }

    pub fn read_varint32(&mut self) -> Result<u32> {
        Ok(self.read_varint()? as u32)
    }

    pub fn read_int32(&mut self) -> Result<i32> {
        Ok(self.read_varint()? as i32)
    }

    pub fn read_int64(&mut self) -> Result<i64> {
        Ok(self.read_varint()? as i64)
    }

    pub fn read_svarint(&mut self) -> Result<i64> {
        let n = self.read_varint()?;
        Ok(((n >> 1) as i64) ^ -((n & 1) as i64))
    }

    pub fn read_sint32(&mut self) -> Result<i32> {
        Ok(self.read_svarint()? as i32)
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_varint()? != 0)
    }

    pub fn read_fixed32(&mut self) -> Result<u32> {
        self.take(4).map(LittleEndian::read_u32)
    }

    pub fn read_sfixed32(&mut self) -> Result<i32> {
        self.take(4).map(LittleEndian::read_i32)
    }

    pub fn read_fixed64(&mut self) -> Result<u64> {
        self.take(8).map(LittleEndian::read_u64)
    }

    pub fn read_sfixed64(&mut self) -> Result<i64> {
        self.take(8).map(LittleEndian::read_i64)
    }

    pub fn read_float(&mut self) -> Result<f32> {
        self.take(4).map(LittleEndian::read_f32)
    }

    pub fn read_double(&mut self) -> Result<f64> {
        self.take(8).map(LittleEndian::read_f64)
    }

    pub fn read_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.read_varint()? as usize;
        self.take(len)
    }

    pub fn read_string(&mut self) -> Result<&'a str> {
        let bytes = self.read_bytes()?;
        Ok(std::str::from_utf8(bytes)?)
    }

    /// Reads a packed repeated field, or a single unpacked element when the
    /// field was not written packed.
    pub fn read_packed<T, F>(&mut self, out: &mut Vec<T>, mut read: F) -> Result<()>
    where
        F: FnMut(&mut Self) -> Result<T>,
    {
        if self.wire_type != WireType::Bytes {
            out.push(read(self)?);
            return Ok(());
        }

        let end = self.read_length_end()?;
        while self.pos < end {
            out.push(read(self)?);
        }

        if self.pos != end {
            return Err(Error::UnexpectedEof);
        }

        Ok(())
    }

    pub fn read_packed_varint(&mut self, out: &mut Vec<u64>) -> Result<()> {
        self.read_packed(out, Self::read_varint)
    }

    pub fn read_packed_varint32(&mut self, out: &mut Vec<u32>) -> Result<()> {
        self.read_packed(out, Self::read_varint32)
    }

    pub fn read_packed_svarint(&mut self, out: &mut Vec<i64>) -> Result<()> {
        self.read_packed(out, Self::read_svarint)
    }

    pub fn read_packed_bool(&mut self, out: &mut Vec<bool>) -> Result<()> {
        self.read_packed(out, Self::read_bool)
    }

    pub fn read_packed_fixed32(&mut self, out: &mut Vec<u32>) -> Result<()> {
        self.read_packed(out, Self::read_fixed32)
    }

    pub fn read_packed_sfixed32(&mut self, out: &mut Vec<i32>) -> Result<()> {
        self.read_packed(out, Self::read_sfixed32)
    }

    pub fn read_packed_fixed64(&mut self, out: &mut Vec<u64>) -> Result<()> {
        self.read_packed(out, Self::read_fixed64)
    }

    pub fn read_packed_sfixed64(&mut self, out: &mut Vec<i64>) -> Result<()> {
        self.read_packed(out, Self::read_sfixed64)
    }

    pub fn read_packed_float(&mut self, out: &mut Vec<f32>) -> Result<()> {
        self.read_packed(out, Self::read_float)
    }

    pub fn read_packed_double(&mut self, out: &mut Vec<f64>) -> Result<()> {
        self.read_packed(out, Self::read_double)
    }

    pub fn skip(&mut self, wire_type: WireType) -> Result<()> {
        match wire_type {
            WireType::Varint => {
                self.read_varint()?;
            }
            WireType::Bytes => {
                let end = self.read_length_end()?;
                self.pos = end;
            }
            WireType::Fixed32 => {
                self.take(4)?;
            }
            WireType::Fixed64 => {
                self.take(8)?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct PbfWriter {
    buf: Vec<u8>,
}

fn encode_varint(mut val: u64, out: &mut SmallVec<[u8; 10]>) {
    while val >= 0x80 {
        out.push((val as u8 & 0x7f) | 0x80);
        val >>= 7;
    }
    out.push(val as u8);
}

impl PbfWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_tag(&mut self, field: u32, wire_type: WireType) {
        self.write_varint(((field as u64) << 3) | wire_type as u64);
    }

    pub fn write_varint(&mut self, val: u64) {
        let mut bytes = SmallVec::new();
        encode_varint(val, &mut bytes);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn write_svarint(&mut self, val: i64) {
        self.write_varint(((val << 1) ^ (val >> 63)) as u64);
    }

    pub fn write_bool(&mut self, val: bool) {
        self.write_varint(val as u64);
    }

    pub fn write_fixed32(&mut self, val: u32) {
        let mut bytes = [0; 4];
        LittleEndian::write_u32(&mut bytes, val);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn write_sfixed32(&mut self, val: i32) {
        self.write_fixed32(val as u32);
    }

    pub fn write_fixed64(&mut self, val: u64) {
        let mut bytes = [0; 8];
        LittleEndian::write_u64(&mut bytes, val);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn write_sfixed64(&mut self, val: i64) {
        self.write_fixed64(val as u64);
    }

    pub fn write_float(&mut self, val: f32) {
        self.write_fixed32(val.to_bits());
    }

    pub fn write_double(&mut self, val: f64) {
        self.write_fixed64(val.to_bits());
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.write_varint(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn write_string(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Writes an embedded message. One byte is reserved for the length and
    /// the buffer is spliced when the body needs a longer prefix.
    pub fn write_message<F>(&mut self, field: u32, write: F)
    where
        F: FnOnce(&mut PbfWriter),
    {
        self.write_tag(field, WireType::Bytes);
        self.buf.push(0);
        let start = self.buf.len();

        write(self);

        let len = self.buf.len() - start;
        if len < 0x80 {
            self.buf[start - 1] = len as u8;
        } else {
            let mut prefix = SmallVec::new();
            encode_varint(len as u64, &mut prefix);
            self.buf.splice(start - 1..start, prefix);
        }
    }

    pub fn write_varint_field(&mut self, field: u32, val: u64) {
        self.write_tag(field, WireType::Varint);
        self.write_varint(val);
    }

    pub fn write_svarint_field(&mut self, field: u32, val: i64) {
        self.write_tag(field, WireType::Varint);
        self.write_svarint(val);
    }

    pub fn write_bool_field(&mut self, field: u32, val: bool) {
        self.write_tag(field, WireType::Varint);
        self.write_bool(val);
    }

    pub fn write_fixed32_field(&mut self, field: u32, val: u32) {
        self.write_tag(field, WireType::Fixed32);
        self.write_fixed32(val);
    }

    pub fn write_sfixed32_field(&mut self, field: u32, val: i32) {
        self.write_tag(field, WireType::Fixed32);
        self.write_sfixed32(val);
    }

    pub fn write_fixed64_field(&mut self, field: u32, val: u64) {
        self.write_tag(field, WireType::Fixed64);
        self.write_fixed64(val);
    }

    pub fn write_sfixed64_field(&mut self, field: u32, val: i64) {
        self.write_tag(field, WireType::Fixed64);
        self.write_sfixed64(val);
    }

    pub fn write_float_field(&mut self, field: u32, val: f32) {
        self.write_tag(field, WireType::Fixed32);
        self.write_float(val);
    }

    pub fn write_double_field(&mut self, field: u32, val: f64) {
        self.write_tag(field, WireType::Fixed64);
        self.write_double(val);
    }

    pub fn write_bytes_field(&mut self, field: u32, bytes: &[u8]) {
        self.write_tag(field, WireType::Bytes);
        self.write_bytes(bytes);
    }

    pub fn write_string_field(&mut self, field: u32, s: &str) {
        self.write_tag(field, WireType::Bytes);
        self.write_string(s);
    }

    fn write_packed<T: Copy, F>(&mut self, field: u32, values: &[T], mut write: F)
    where
        F: FnMut(&mut PbfWriter, T),
    {
        if values.is_empty() {
            return;
        }

        self.write_message(field, |pbf| {
            for &v in values {
                write(pbf, v);
            }
        });
    }

    pub fn write_packed_varint(&mut self, field: u32, values: &[u64]) {
        self.write_packed(field, values, PbfWriter::write_varint);
    }

    pub fn write_packed_varint32(&mut self, field: u32, values: &[u32]) {
        self.write_packed(field, values, |pbf, v| pbf.write_varint(v as u64));
    }

    pub fn write_packed_svarint(&mut self, field: u32, values: &[i64]) {
        self.write_packed(field, values, PbfWriter::write_svarint);
    }

    pub fn write_packed_bool(&mut self, field: u32, values: &[bool]) {
        self.write_packed(field, values, PbfWriter::write_bool);
    }

    pub fn write_packed_fixed32(&mut self, field: u32, values: &[u32]) {
        self.write_packed(field, values, PbfWriter::write_fixed32);
    }

    pub fn write_packed_sfixed32(&mut self, field: u32, values: &[i32]) {
        self.write_packed(field, values, PbfWriter::write_sfixed32);
    }

    pub fn write_packed_fixed64(&mut self, field: u32, values: &[u64]) {
        self.write_packed(field, values, PbfWriter::write_fixed64);
    }

    pub fn write_packed_sfixed64(&mut self, field: u32, values: &[i64]) {
        self.write_packed(field, values, PbfWriter::write_sfixed64);
    }

    pub fn write_packed_float(&mut self, field: u32, values: &[f32]) {
        self.write_packed(field, values, PbfWriter::write_float);
    }

    pub fn write_packed_double(&mut self, field: u32, values: &[f64]) {
        self.write_packed(field, values, PbfWriter::write_double);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn varints_round_trip() {
        let values = [0u64, 1, 127, 128, 300, 1 << 28, (1 << 35) + 7, u64::MAX];
        let mut w = PbfWriter::new();
        for v in values {
            w.write_varint(v);
        }
        let bytes = w.finish();

        let mut r = Pbf::new(&bytes);
        for v in values {
            assert_eq!(r.read_varint().unwrap(), v);
        }
        assert_eq!(r.pos(), bytes.len());
    }

    #[test]
    fn zigzag_edge_cases() {
        let values = [0i64, -1, 1, i32::MAX as i64, i32::MIN as i64, i64::MIN, i64::MAX];
        let mut w = PbfWriter::new();
        for v in values {
            w.write_svarint(v);
        }
        let bytes = w.finish();
        assert_eq!(&bytes[..2], &[0, 1]);

        let mut r = Pbf::new(&bytes);
        for v in values {
            assert_eq!(r.read_svarint().unwrap(), v);
        }
    }

    #[test]
    fn negative_int32_uses_ten_bytes() {
        let mut w = PbfWriter::new();
        w.write_varint(-1i32 as i64 as u64);
        let bytes = w.finish();
        assert_eq!(bytes.len(), 10);
        assert_eq!(Pbf::new(&bytes).read_int32().unwrap(), -1);
    }

    #[test]
    fn fixed_width_round_trip() {
        let mut w = PbfWriter::new();
        w.write_fixed32(0xdead_beef);
        w.write_sfixed32(i32::MIN);
        w.write_fixed64(u64::MAX - 1);
        w.write_sfixed64(-42);
        w.write_float(1.5);
        w.write_double(-0.125);
        w.write_bool(true);
        let bytes = w.finish();

        let mut r = Pbf::new(&bytes);
        assert_eq!(r.read_fixed32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_sfixed32().unwrap(), i32::MIN);
        assert_eq!(r.read_fixed64().unwrap(), u64::MAX - 1);
        assert_eq!(r.read_sfixed64().unwrap(), -42);
        assert_eq!(r.read_float().unwrap(), 1.5);
        assert_eq!(r.read_double().unwrap(), -0.125);
        assert!(r.read_bool().unwrap());
    }

    #[derive(Default, Debug, PartialEq)]
    struct Sample {
        name: String,
        ints: Vec<i64>,
        floats: Vec<f32>,
        doubles: Vec<f64>,
        flags: Vec<bool>,
        fixed: Vec<u32>,
        nested: Vec<u64>,
    }

    fn read_sample(bytes: &[u8]) -> Result<Sample> {
        let mut sample = Sample::default();
        let mut r = Pbf::new(bytes);
        let end = r.len();
        r.read_fields(end, &mut sample, |field, sample, pbf| {
            match field {
                1 => sample.name = pbf.read_string()?.to_string(),
                2 => pbf.read_packed_svarint(&mut sample.ints)?,
                3 => pbf.read_packed_float(&mut sample.floats)?,
                4 => pbf.read_packed_double(&mut sample.doubles)?,
                5 => pbf.read_packed_bool(&mut sample.flags)?,
                6 => pbf.read_packed_fixed32(&mut sample.fixed)?,
                7 => pbf.read_message(&mut sample.nested, |field, nested, pbf| {
                    if field == 1 {
                        pbf.read_packed_varint(nested)?;
                    }
                    Ok(())
                })?,
                _ => (),
            }
            Ok(())
        })?;
        Ok(sample)
    }

    #[test]
    fn packed_fields_round_trip() {
        let mut w = PbfWriter::new();
        w.write_string_field(1, "road");
        w.write_packed_svarint(2, &[-1, 0, i32::MAX as i64, i32::MIN as i64]);
        w.write_packed_float(3, &[0.5, -2.25]);
        w.write_packed_double(4, &[1e10]);
        w.write_packed_bool(5, &[true, false, true]);
        w.write_packed_fixed32(6, &[7, 8]);
        w.write_message(7, |w| w.write_packed_varint(1, &[1, 2, 300]));
        let bytes = w.finish();

        let sample = read_sample(&bytes).unwrap();
        assert_eq!(
            sample,
            Sample {
                name: "road".into(),
                ints: vec![-1, 0, i32::MAX as i64, i32::MIN as i64],
                floats: vec![0.5, -2.25],
                doubles: vec![1e10],
                flags: vec![true, false, true],
                fixed: vec![7, 8],
                nested: vec![1, 2, 300],
            }
        );
    }

    #[test]
    fn unpacked_repeated_fields_accumulate() {
        let mut w = PbfWriter::new();
        w.write_svarint_field(2, -5);
        w.write_svarint_field(2, 6);
        let sample = read_sample(&w.finish()).unwrap();
        assert_eq!(sample.ints, vec![-5, 6]);
    }

    #[test]
    fn unknown_fields_are_skipped() {
        let mut w = PbfWriter::new();
        w.write_varint_field(20, 99);
        w.write_double_field(21, 2.0);
        w.write_fixed32_field(22, 3);
        w.write_bytes_field(23, &[1, 2, 3]);
        w.write_string_field(1, "kept");
        let sample = read_sample(&w.finish()).unwrap();
        assert_eq!(sample.name, "kept");
    }

    #[test]
    fn unknown_wire_type_is_fatal() {
        // field 1, wire type 3 (start group)
        let bytes = [0x0b, 0x00];
        assert!(matches!(read_sample(&bytes), Err(Error::UnknownWireType(3))));
    }

    #[test]
    fn long_messages_splice_their_length() {
        for len in [127usize, 128, 16_383, 16_384, 70_000] {
            let body = vec![0xabu8; len];
            let mut w = PbfWriter::new();
            w.write_message(3, |w| w.buf.extend_from_slice(&body));
            w.write_varint_field(4, 1);
            let bytes = w.finish();

            let mut r = Pbf::new(&bytes);
            let end = r.len();
            let mut seen = (0, 0);
            r.read_fields(end, &mut seen, |field, seen, pbf| {
                match field {
                    3 => seen.0 = pbf.read_bytes()?.len(),
                    4 => seen.1 = pbf.read_varint()?,
                    _ => (),
                }
                Ok(())
            })
            .unwrap();
            assert_eq!(seen, (len, 1));
        }
    }

    #[test]
    fn truncated_input_is_an_error() {
        let mut w = PbfWriter::new();
        w.write_string_field(1, "truncated");
        let bytes = w.finish();
        assert!(matches!(
            read_sample(&bytes[..bytes.len() - 2]),
            Err(Error::UnexpectedEof)
        ));
        assert!(matches!(
            Pbf::new(&[0x80, 0x80]).read_varint(),
            Err(Error::UnexpectedEof)
        ));
    }

    #[test]
    fn overlong_varint_is_an_error() {
        let bytes = [0xffu8; 11];
        assert!(matches!(
            Pbf::new(&bytes).read_varint(),
            Err(Error::VarintOverflow)
        ));
    }

    #[test]
    fn invalid_utf8_is_an_error() {
        let mut w = PbfWriter::new();
        w.write_bytes_field(1, &[0xff, 0xfe]);
        assert!(matches!(
            read_sample(&w.finish()),
            Err(Error::InvalidUtf8(_))
        ));
    }
}
