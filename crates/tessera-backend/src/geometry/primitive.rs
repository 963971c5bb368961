/// How a run of vertices is assembled into primitives.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum PrimitiveType {
    #[default]
    Triangles,
    Lines,
    Points,
}

impl PrimitiveType {
    /// Decodes an engine primitive id (`0` triangles, `1` lines, `2` points).
    pub const fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(PrimitiveType::Triangles),
            1 => Some(PrimitiveType::Lines),
            2 => Some(PrimitiveType::Points),
            _ => None,
        }
    }

    pub const fn vertices_per_primitive(self) -> usize {
        match self {
            PrimitiveType::Triangles => 3,
            PrimitiveType::Lines => 2,
            PrimitiveType::Points => 1,
        }
    }

    /// Whole primitives in `vertex_count` vertices; a trailing partial
    /// primitive is dropped.
    pub const fn primitive_count(self, vertex_count: usize) -> usize {
        vertex_count / self.vertices_per_primitive()
    }
}

/// Primitive count for a raw engine id; unknown ids yield 0 so nothing is drawn.
pub const fn primitive_count_raw(raw: u32, vertex_count: usize) -> usize {
    match PrimitiveType::from_raw(raw) {
        Some(kind) => kind.primitive_count(vertex_count),
        None => 0,
    }
}

/// Expected update frequency of a buffer's contents.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum BufferUsageHint {
    #[default]
    Static,
    Dynamic,
    Stream,
}

impl BufferUsageHint {
    /// Dynamic and Stream contents are rewritten often and ask the device for
    /// a dynamic allocation.
    pub const fn is_dynamic(self) -> bool {
        matches!(self, BufferUsageHint::Dynamic | BufferUsageHint::Stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_floor_for_every_kind() {
        for n in 0..64 {
            assert_eq!(PrimitiveType::Triangles.primitive_count(n), n / 3);
            assert_eq!(PrimitiveType::Lines.primitive_count(n), n / 2);
            assert_eq!(PrimitiveType::Points.primitive_count(n), n);
        }
    }

    #[test]
    fn partial_triangle_is_dropped() {
        assert_eq!(PrimitiveType::Triangles.primitive_count(7), 2);
        assert_eq!(PrimitiveType::Lines.primitive_count(5), 2);
    }

    #[test]
    fn unknown_raw_id_draws_nothing() {
        assert_eq!(PrimitiveType::from_raw(7), None);
        assert_eq!(primitive_count_raw(7, 300), 0);
        assert_eq!(primitive_count_raw(1, 10), 5);
    }

    #[test]
    fn dynamic_hints() {
        assert!(!BufferUsageHint::Static.is_dynamic());
        assert!(BufferUsageHint::Dynamic.is_dynamic());
        assert!(BufferUsageHint::Stream.is_dynamic());
    }
}
