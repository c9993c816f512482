//! Record layouts for bucket buffers and the group bookkeeping shared by all
//! bucket kinds.

use std::mem::offset_of;

use crate::struct_array::{Member, MemberType, Record, SerializedStructArray, StructArray};

/// Element indices are 16 bit, a group never holds more vertices than this.
pub const MAX_VERTEX_ARRAY_LENGTH: usize = u16::MAX as usize;

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FillVertex {
    pub pos: [i16; 2],
}

impl Record for FillVertex {
    const MEMBERS: &'static [Member] = &[Member::new(
        "a_pos",
        MemberType::Int16,
        2,
        offset_of!(FillVertex, pos),
    )];
    const ALIGNMENT: usize = 4;
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CircleVertex {
    pub pos: [i16; 2],
}

impl Record for CircleVertex {
    const MEMBERS: &'static [Member] = &[Member::new(
        "a_pos",
        MemberType::Int16,
        2,
        offset_of!(CircleVertex, pos),
    )];
    const ALIGNMENT: usize = 4;
}

/// `pos` carries the point doubled with the round/up flags in the low bit,
/// `data` the extrude vector, direction and the 14 bit line distance.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LineVertex {
    pub pos: [i16; 2],
    pub data: [u8; 4],
}

impl Record for LineVertex {
    const MEMBERS: &'static [Member] = &[
        Member::new("a_pos", MemberType::Int16, 2, offset_of!(LineVertex, pos)),
        Member::new("a_data", MemberType::Uint8, 4, offset_of!(LineVertex, data)),
    ];
    const ALIGNMENT: usize = 4;
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SymbolVertex {
    pub pos: [i16; 2],
    pub offset: [i16; 2],
    pub texture_pos: [u16; 2],
    pub data: [u8; 4],
}

impl Record for SymbolVertex {
    const MEMBERS: &'static [Member] = &[
        Member::new("a_pos", MemberType::Int16, 2, offset_of!(SymbolVertex, pos)),
        Member::new("a_offset", MemberType::Int16, 2, offset_of!(SymbolVertex, offset)),
        Member::new(
            "a_texture_pos",
            MemberType::Uint16,
            2,
            offset_of!(SymbolVertex, texture_pos),
        ),
        Member::new("a_data", MemberType::Uint8, 4, offset_of!(SymbolVertex, data)),
    ];
    const ALIGNMENT: usize = 4;
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CollisionBoxVertex {
    pub pos: [i16; 2],
    pub extrude: [i16; 2],
    pub data: [u8; 2],
    _pad: [u8; 2],
}

impl CollisionBoxVertex {
    pub fn new(pos: [i16; 2], extrude: [i16; 2], data: [u8; 2]) -> Self {
        CollisionBoxVertex {
            pos,
            extrude,
            data,
            _pad: [0; 2],
        }
    }
}

impl Record for CollisionBoxVertex {
    const MEMBERS: &'static [Member] = &[
        Member::new("a_pos", MemberType::Int16, 2, offset_of!(CollisionBoxVertex, pos)),
        Member::new(
            "a_extrude",
            MemberType::Int16,
            2,
            offset_of!(CollisionBoxVertex, extrude),
        ),
        Member::new("a_data", MemberType::Uint8, 2, offset_of!(CollisionBoxVertex, data)),
    ];
    const ALIGNMENT: usize = 4;
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct TriangleElement {
    pub vertices: [u16; 3],
}

impl Record for TriangleElement {
    const MEMBERS: &'static [Member] = &[Member::new(
        "vertices",
        MemberType::Uint16,
        3,
        offset_of!(TriangleElement, vertices),
    )];
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LineElement {
    pub vertices: [u16; 2],
}

impl Record for LineElement {
    const MEMBERS: &'static [Member] = &[Member::new(
        "vertices",
        MemberType::Uint16,
        2,
        offset_of!(LineElement, vertices),
    )];
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FillAttributes {
    pub color: [u8; 4],
    pub outline_color: [u8; 4],
}

impl Record for FillAttributes {
    const MEMBERS: &'static [Member] = &[
        Member::new("a_color", MemberType::Uint8, 4, offset_of!(FillAttributes, color)),
        Member::new(
            "a_outline_color",
            MemberType::Uint8,
            4,
            offset_of!(FillAttributes, outline_color),
        ),
    ];
    const ALIGNMENT: usize = 4;
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LineAttributes {
    pub color: [u8; 4],
    pub width: f32,
}

impl Record for LineAttributes {
    const MEMBERS: &'static [Member] = &[
        Member::new("a_color", MemberType::Uint8, 4, offset_of!(LineAttributes, color)),
        Member::new("a_width", MemberType::Float32, 1, offset_of!(LineAttributes, width)),
    ];
    const ALIGNMENT: usize = 4;
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CircleAttributes {
    pub color: [u8; 4],
    pub radius: f32,
}

impl Record for CircleAttributes {
    const MEMBERS: &'static [Member] = &[
        Member::new("a_color", MemberType::Uint8, 4, offset_of!(CircleAttributes, color)),
        Member::new("a_radius", MemberType::Float32, 1, offset_of!(CircleAttributes, radius)),
    ];
    const ALIGNMENT: usize = 4;
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct SymbolAttributes {
    pub fill_color: [u8; 4],
    pub halo_color: [u8; 4],
}

impl Record for SymbolAttributes {
    const MEMBERS: &'static [Member] = &[
        Member::new("a_fill_color", MemberType::Uint8, 4, offset_of!(SymbolAttributes, fill_color)),
        Member::new("a_halo_color", MemberType::Uint8, 4, offset_of!(SymbolAttributes, halo_color)),
    ];
    const ALIGNMENT: usize = 4;
}

/// One draw batch: vertices, up to two element arrays indexing into them and
/// a paint array per child layer, each as long as the vertex array.
#[derive(Debug)]
pub struct ArrayGroup<V, E, E2, P> {
    pub layout_vertex_array: StructArray<V>,
    pub element_array: StructArray<E>,
    pub element_array2: Option<StructArray<E2>>,
    pub paint_vertex_arrays: Vec<(String, StructArray<P>)>,
}

impl<V: Record, E: Record, E2: Record, P: Record> ArrayGroup<V, E, E2, P> {
    fn new(paint_layers: &[String], with_element_array2: bool) -> Self {
        ArrayGroup {
            layout_vertex_array: StructArray::new(),
            element_array: StructArray::new(),
            element_array2: with_element_array2.then(StructArray::new),
            paint_vertex_arrays: paint_layers
                .iter()
                .map(|id| (id.clone(), StructArray::new()))
                .collect(),
        }
    }

    pub fn vertex_length(&self) -> usize {
        self.layout_vertex_array.len()
    }

    /// Appends `paint` for each child layer until every paint array covers
    /// the vertex array.
    pub fn populate_paint_arrays<F: FnMut(&str) -> P>(&mut self, mut paint: F) {
        let len = self.layout_vertex_array.len();
        for (layer_id, array) in self.paint_vertex_arrays.iter_mut() {
            let record = paint(layer_id);
            while array.len() < len {
                array.emplace_back(record);
            }
        }
    }

    pub fn serialize(self) -> SerializedArrayGroup {
        SerializedArrayGroup {
            layout_vertex_array: self.layout_vertex_array.serialize(),
            element_array: self.element_array.serialize(),
            element_array2: self.element_array2.map(StructArray::serialize),
            paint_vertex_arrays: self
                .paint_vertex_arrays
                .into_iter()
                .map(|(id, array)| (id, array.serialize()))
                .collect(),
        }
    }
}

/// The ordered groups for one program ("fill", "line", "glyph", ...).
#[derive(Debug)]
pub struct ProgramGroup<V, E, E2, P> {
    pub groups: Vec<ArrayGroup<V, E, E2, P>>,
    paint_layers: Vec<String>,
    with_element_array2: bool,
}

impl<V: Record, E: Record, E2: Record, P: Record> ProgramGroup<V, E, E2, P> {
    pub fn new(paint_layers: Vec<String>, with_element_array2: bool) -> Self {
        ProgramGroup {
            groups: Vec::new(),
            paint_layers,
            with_element_array2,
        }
    }

    /// The group the next `num_vertices` vertices go into, starting a fresh
    /// group when the current one would overflow 16 bit indices.
    pub fn prepare(&mut self, num_vertices: usize) -> &mut ArrayGroup<V, E, E2, P> {
        let full = match self.groups.last() {
            Some(group) => group.vertex_length() + num_vertices > MAX_VERTEX_ARRAY_LENGTH,
            None => true,
        };

        if full {
            self.groups
                .push(ArrayGroup::new(&self.paint_layers, self.with_element_array2));
        }

        let last = self.groups.len() - 1;
        &mut self.groups[last]
    }

    pub fn vertex_count(&self) -> usize {
        self.groups.iter().map(|g| g.vertex_length()).sum()
    }

    pub fn element_count(&self) -> usize {
        self.groups.iter().map(|g| g.element_array.len()).sum()
    }

    pub fn element2_count(&self) -> usize {
        self.groups
            .iter()
            .filter_map(|g| g.element_array2.as_ref())
            .map(|a| a.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count() == 0
    }

    pub fn serialize(self) -> Vec<SerializedArrayGroup> {
        self.groups.into_iter().map(ArrayGroup::serialize).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SerializedArrayGroup {
    pub layout_vertex_array: SerializedStructArray,
    pub element_array: SerializedStructArray,
    pub element_array2: Option<SerializedStructArray>,
    pub paint_vertex_arrays: Vec<(String, SerializedStructArray)>,
}

impl SerializedArrayGroup {
    pub fn buffers(&self) -> impl Iterator<Item = &[u8]> {
        std::iter::once(self.layout_vertex_array.bytes())
            .chain(std::iter::once(self.element_array.bytes()))
            .chain(self.element_array2.iter().map(|a| a.bytes()))
            .chain(self.paint_vertex_arrays.iter().map(|(_, a)| a.bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_split_at_the_index_limit() {
        let mut program: ProgramGroup<FillVertex, TriangleElement, LineElement, FillAttributes> =
            ProgramGroup::new(vec!["water".into()], true);

        let group = program.prepare(60_000);
        for _ in 0..60_000 {
            group.layout_vertex_array.emplace_back(FillVertex { pos: [0, 0] });
        }
        assert_eq!(program.groups.len(), 1);

        program.prepare(5_535);
        assert_eq!(program.groups.len(), 1);

        program.prepare(5_536);
        assert_eq!(program.groups.len(), 2);
        assert!(program.groups[1].element_array2.is_some());
        assert_eq!(program.groups[1].paint_vertex_arrays[0].0, "water");
    }

    #[test]
    fn paint_arrays_follow_vertex_count() {
        let mut program: ProgramGroup<CircleVertex, TriangleElement, LineElement, CircleAttributes> =
            ProgramGroup::new(vec!["a".into(), "b".into()], false);
        let group = program.prepare(4);
        for _ in 0..4 {
            group.layout_vertex_array.emplace_back(CircleVertex { pos: [1, 1] });
        }
        group.populate_paint_arrays(|id| CircleAttributes {
            color: [255, 0, 0, 255],
            radius: if id == "a" { 2.0 } else { 3.0 },
        });

        let serialized = program.serialize();
        assert_eq!(serialized.len(), 1);
        let group = &serialized[0];
        assert_eq!(group.paint_vertex_arrays[1].1.length, 4);
        assert_eq!(group.element_array2, None);
        assert_eq!(group.buffers().count(), 4);
        assert_eq!(group.layout_vertex_array.array_buffer.len(), 16);
    }

    #[test]
    fn groups_describe_their_arrays() {
        let mut program: ProgramGroup<FillVertex, TriangleElement, LineElement, FillAttributes> =
            ProgramGroup::new(vec!["water".into()], true);
        program.prepare(3).layout_vertex_array.emplace_back(FillVertex { pos: [0, 0] });

        let debug = format!("{program:?}");
        assert!(debug.contains("layout_vertex_array: StructArray { length: 1"), "{debug}");
        assert!(debug.contains("water"));
    }
}
