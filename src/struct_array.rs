//! Growable arrays of fixed-size binary records.
//!
//! Every record type is a `#[repr(C)]` [`bytemuck::Pod`] struct implementing
//! [`Record`], which describes its fields statically. The array itself is a
//! single byte buffer so it can be handed to a consumer without copying.

use bytemuck::Pod;

const DEFAULT_CAPACITY: usize = 128;
const RESIZE_MULTIPLIER: usize = 5;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MemberType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Float32,
}

impl MemberType {
    pub const fn size(&self) -> usize {
        match self {
            MemberType::Int8 | MemberType::Uint8 => 1,
            MemberType::Int16 | MemberType::Uint16 => 2,
            MemberType::Int32 | MemberType::Uint32 | MemberType::Float32 => 4,
        }
    }

    fn read(&self, bytes: &[u8]) -> f64 {
        match self {
            MemberType::Int8 => bytes[0] as i8 as f64,
            MemberType::Uint8 => bytes[0] as f64,
            MemberType::Int16 => i16::from_ne_bytes([bytes[0], bytes[1]]) as f64,
            MemberType::Uint16 => u16::from_ne_bytes([bytes[0], bytes[1]]) as f64,
            MemberType::Int32 => i32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            MemberType::Uint32 => {
                u32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
            MemberType::Float32 => {
                f32::from_ne_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Member {
    pub name: &'static str,
    pub kind: MemberType,
    pub components: usize,
    pub offset: usize,
}

impl Member {
    pub const fn new(
        name: &'static str,
        kind: MemberType,
        components: usize,
        offset: usize,
    ) -> Self {
        Member {
            name,
            kind,
            components,
            offset,
        }
    }

    pub const fn size(&self) -> usize {
        self.kind.size() * self.components
    }
}

/// A record stored in a [`StructArray`].
pub trait Record: Pod {
    const MEMBERS: &'static [Member];
    const ALIGNMENT: usize = 1;

    fn bytes_per_element() -> usize {
        std::mem::size_of::<Self>()
    }

    fn member(name: &str) -> Option<&'static Member> {
        Self::MEMBERS.iter().find(|m| m.name == name)
    }
}

/// Field offsets and record size for members laid out in order, each member
/// padded to `min(alignment, member component size)` and the record rounded
/// up to `alignment`.
pub fn compute_layout(members: &[(MemberType, usize)], alignment: usize) -> (Vec<usize>, usize) {
    let alignment = alignment.max(1);
    let mut offsets = Vec::with_capacity(members.len());
    let mut offset = 0usize;

    for &(kind, components) in members {
        let align = alignment.min(kind.size());
        offset = offset.div_ceil(align) * align;
        offsets.push(offset);
        offset += kind.size() * components;
    }

    (offsets, offset.div_ceil(alignment) * alignment)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SerializedStructArray {
    pub array_buffer: Vec<u8>,
    pub length: usize,
}

impl SerializedStructArray {
    pub fn bytes(&self) -> &[u8] {
        &self.array_buffer
    }
}

#[derive(Clone)]
pub struct StructArray<T> {
    data: Vec<u8>,
    length: usize,
    capacity: usize,
    _record: std::marker::PhantomData<T>,
}

impl<T> std::fmt::Debug for StructArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructArray")
            .field("length", &self.length)
            .field("capacity", &self.capacity)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl<T: Record> Default for StructArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Record> StructArray<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        StructArray {
            data: vec![0; capacity * T::bytes_per_element()],
            length: 0,
            capacity,
            _record: std::marker::PhantomData,
        }
    }

    /// Rebuilds an array around a serialized buffer without copying it.
    pub fn from_serialized(serialized: SerializedStructArray) -> Self {
        let size = T::bytes_per_element();
        let capacity = serialized.array_buffer.len() / size;

        StructArray {
            data: serialized.array_buffer,
            length: serialized.length.min(capacity),
            capacity,
            _record: std::marker::PhantomData,
        }
    }

    pub fn serialize(mut self) -> SerializedStructArray {
        self.trim();
        SerializedStructArray {
            array_buffer: self.data,
            length: self.length,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn bytes_per_element(&self) -> usize {
        T::bytes_per_element()
    }

    /// Sets the length to `n`, growing the buffer when needed. New records
    /// are zeroed.
    pub fn resize(&mut self, n: usize) {
        if n > self.capacity {
            self.capacity = n.max(self.capacity * RESIZE_MULTIPLIER);
            self.data.resize(self.capacity * T::bytes_per_element(), 0);
        }
        self.length = n;
    }

    /// Shrinks the buffer to exactly `len()` records.
    pub fn trim(&mut self) {
        if self.length < self.capacity {
            self.capacity = self.length;
            self.data.truncate(self.length * T::bytes_per_element());
            self.data.shrink_to_fit();
        }
    }

    pub fn clear(&mut self) {
        self.length = 0;
    }

    pub fn emplace_back(&mut self, record: T) -> usize {
        let index = self.length;
        self.resize(index + 1);
        self.set(index, record);
        index
    }

    fn range(&self, index: usize) -> std::ops::Range<usize> {
        let size = T::bytes_per_element();
        index * size..(index + 1) * size
    }

    pub fn get(&self, index: usize) -> Option<T> {
        if index >= self.length {
            return None;
        }
        Some(bytemuck::pod_read_unaligned(&self.data[self.range(index)]))
    }

    pub fn set(&mut self, index: usize, record: T) {
        if index < self.length {
            let range = self.range(index);
            self.data[range].copy_from_slice(bytemuck::bytes_of(&record));
        }
    }

    pub fn update<F: FnOnce(&mut T)>(&mut self, index: usize, f: F) {
        if let Some(mut record) = self.get(index) {
            f(&mut record);
            self.set(index, record);
        }
    }

    /// Reads one component of a named member as a float.
    pub fn member_value(&self, index: usize, name: &str, component: usize) -> Option<f64> {
        let member = T::member(name)?;
        if index >= self.length || component >= member.components {
            return None;
        }

        let start = index * T::bytes_per_element() + member.offset + component * member.kind.size();
        Some(member.kind.read(&self.data[start..start + member.kind.size()]))
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        (0..self.length).filter_map(|i| self.get(i))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.length * T::bytes_per_element()]
    }
}

impl<T: Record> Extend<T> for StructArray<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for record in iter {
            self.emplace_back(record);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffers::{CollisionBoxVertex, LineVertex, SymbolVertex};

    #[repr(C)]
    #[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
    struct Sample {
        pos: [i16; 2],
        value: f32,
        flags: [u8; 4],
    }

    impl Record for Sample {
        const MEMBERS: &'static [Member] = &[
            Member::new("pos", MemberType::Int16, 2, std::mem::offset_of!(Sample, pos)),
            Member::new("value", MemberType::Float32, 1, std::mem::offset_of!(Sample, value)),
            Member::new("flags", MemberType::Uint8, 4, std::mem::offset_of!(Sample, flags)),
        ];
        const ALIGNMENT: usize = 4;
    }

    fn sample(i: usize) -> Sample {
        Sample {
            pos: [i as i16, -(i as i16)],
            value: i as f32 * 0.5,
            flags: [i as u8, 1, 2, 3],
        }
    }

    #[test]
    fn resize_then_trim_is_exact() {
        let mut array = StructArray::<Sample>::new();
        array.resize(1000);
        assert!(array.capacity() >= 1000);
        array.trim();
        assert_eq!(array.as_bytes().len(), 1000 * 12);
        assert_eq!(array.serialize().array_buffer.len(), 1000 * 12);
    }

    #[test]
    fn grows_geometrically() {
        let mut array = StructArray::<Sample>::new();
        assert_eq!(array.capacity(), 128);
        for i in 0..129 {
            array.emplace_back(sample(i));
        }
        assert_eq!(array.capacity(), 640);
        assert_eq!(array.len(), 129);
    }

    #[test]
    fn serialize_round_trip() {
        let mut array = StructArray::<Sample>::new();
        for i in 0..300 {
            array.emplace_back(sample(i));
        }
        array.update(5, |s| s.value = 99.0);

        let serialized = array.serialize();
        assert_eq!(serialized.length, 300);
        let ptr = serialized.array_buffer.as_ptr();

        let array = StructArray::<Sample>::from_serialized(serialized);
        assert_eq!(array.as_bytes().as_ptr(), ptr);
        assert_eq!(array.len(), 300);
        assert_eq!(array.get(299), Some(sample(299)));
        assert_eq!(array.get(5).map(|s| s.value), Some(99.0));
        assert_eq!(array.get(300), None);
        assert_eq!(array.member_value(7, "pos", 1), Some(-7.0));
        assert_eq!(array.member_value(7, "flags", 0), Some(7.0));
        assert_eq!(array.member_value(7, "pos", 2), None);
    }

    #[test]
    fn declared_offsets_match_computed_layout() {
        fn check<T: Record>() {
            let members: Vec<_> = T::MEMBERS.iter().map(|m| (m.kind, m.components)).collect();
            let (offsets, size) = compute_layout(&members, T::ALIGNMENT);
            let declared: Vec<_> = T::MEMBERS.iter().map(|m| m.offset).collect();
            assert_eq!(offsets, declared);
            assert_eq!(size, T::bytes_per_element());
        }

        check::<Sample>();
        check::<LineVertex>();
        check::<SymbolVertex>();
        check::<CollisionBoxVertex>();
    }

    #[test]
    fn alignment_pads_members_and_records() {
        let (offsets, size) = compute_layout(
            &[(MemberType::Uint8, 1), (MemberType::Float32, 1), (MemberType::Uint8, 2)],
            4,
        );
        assert_eq!(offsets, vec![0, 4, 8]);
        assert_eq!(size, 12);

        let (offsets, size) = compute_layout(&[(MemberType::Uint8, 1), (MemberType::Float32, 1)], 1);
        assert_eq!(offsets, vec![0, 1]);
        assert_eq!(size, 5);
    }
}
