//! Tuple representation, descriptors, and the on-disk field codec.

use bytes::{Buf, BufMut};
use quarry_common::{Field, FieldType, PageId, QuarryError, Result, STRING_LEN};

/// Ordered sequence of field types defining a tuple's width.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TupleDesc {
    fields: Vec<FieldType>,
}

impl TupleDesc {
    /// Creates a descriptor from an ordered list of field types.
    pub fn new(fields: Vec<FieldType>) -> Self {
        Self { fields }
    }

    /// Creates a descriptor of `n` INT fields.
    pub fn int_fields(n: usize) -> Self {
        Self::new(vec![FieldType::Int; n])
    }

    /// Returns the number of fields.
    pub fn num_fields(&self) -> usize {
        self.fields.len()
    }

    /// Returns the type of field `i`.
    pub fn field_type(&self, i: usize) -> FieldType {
        self.fields[i]
    }

    /// Returns the field types in order.
    pub fn field_types(&self) -> &[FieldType] {
        &self.fields
    }

    /// Returns the on-disk size of a tuple with this descriptor.
    pub fn size(&self) -> usize {
        self.fields.iter().map(|f| f.size()).sum()
    }
}

/// Identifies a tuple's physical location: (page id, slot index).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordId {
    /// Page holding the tuple.
    pub page_id: PageId,
    /// Slot index within the page.
    pub slot: u16,
}

impl RecordId {
    /// Creates a new record id.
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.page_id, self.slot)
    }
}

/// A tuple (row) conforming to a [`TupleDesc`].
///
/// The record id is unset on construction; pages assign it on insert and
/// reassign it when slot-local moves shift the tuple. Equality compares the
/// descriptor and fields only, never the record id.
#[derive(Debug, Clone)]
pub struct Tuple {
    desc: TupleDesc,
    fields: Vec<Field>,
    record_id: Option<RecordId>,
}

impl Tuple {
    /// Creates a tuple from a descriptor and conforming field values.
    ///
    /// Fails with `DescriptorMismatch` if the arity or any field type does
    /// not match the descriptor.
    pub fn new(desc: TupleDesc, fields: Vec<Field>) -> Result<Self> {
        if fields.len() != desc.num_fields() {
            return Err(QuarryError::DescriptorMismatch);
        }
        for (i, f) in fields.iter().enumerate() {
            if f.field_type() != desc.field_type(i) {
                return Err(QuarryError::DescriptorMismatch);
            }
        }
        Ok(Self {
            desc,
            fields,
            record_id: None,
        })
    }

    /// Creates an all-INT tuple; convenient for tests and the loader.
    pub fn from_ints(values: &[i32]) -> Self {
        Self {
            desc: TupleDesc::int_fields(values.len()),
            fields: values.iter().map(|&v| Field::Int(v)).collect(),
            record_id: None,
        }
    }

    /// Returns this tuple's descriptor.
    pub fn desc(&self) -> &TupleDesc {
        &self.desc
    }

    /// Returns field `i`.
    pub fn field(&self, i: usize) -> &Field {
        &self.fields[i]
    }

    /// Returns all fields in order.
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    /// Returns the record id, if the tuple is stored on a page.
    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }

    /// Sets or clears the record id.
    pub fn set_record_id(&mut self, rid: Option<RecordId>) {
        self.record_id = rid;
    }

    /// Writes this tuple's fields to a buffer in on-disk format.
    ///
    /// INT fields are 4 bytes; STRING fields are a 4-byte length prefix
    /// followed by exactly STRING_LEN bytes, zero-padded past the length.
    pub fn write_to(&self, buf: &mut impl BufMut) {
        for field in &self.fields {
            match field {
                Field::Int(v) => buf.put_i32_le(*v),
                Field::Str(s) => {
                    let bytes = s.as_bytes();
                    let mut len = bytes.len().min(STRING_LEN);
                    while !s.is_char_boundary(len) {
                        len -= 1;
                    }
                    buf.put_u32_le(len as u32);
                    buf.put_slice(&bytes[..len]);
                    buf.put_bytes(0, STRING_LEN - len);
                }
            }
        }
    }

    /// Reads a tuple conforming to `desc` from a buffer.
    ///
    /// Fails with `ShortRead` if the buffer ends before the descriptor's
    /// width is consumed, and `IllegalArgument` on a corrupt string length.
    pub fn read_from(desc: &TupleDesc, buf: &mut impl Buf) -> Result<Self> {
        let mut fields = Vec::with_capacity(desc.num_fields());
        for i in 0..desc.num_fields() {
            match desc.field_type(i) {
                FieldType::Int => {
                    if buf.remaining() < 4 {
                        return Err(QuarryError::ShortRead {
                            expected: 4,
                            actual: buf.remaining(),
                        });
                    }
                    fields.push(Field::Int(buf.get_i32_le()));
                }
                FieldType::Str => {
                    if buf.remaining() < 4 + STRING_LEN {
                        return Err(QuarryError::ShortRead {
                            expected: 4 + STRING_LEN,
                            actual: buf.remaining(),
                        });
                    }
                    let len = buf.get_u32_le() as usize;
                    if len > STRING_LEN {
                        return Err(QuarryError::IllegalArgument(format!(
                            "string length {} exceeds maximum {}",
                            len, STRING_LEN
                        )));
                    }
                    let mut raw = vec![0u8; STRING_LEN];
                    buf.copy_to_slice(&mut raw);
                    raw.truncate(len);
                    let s = String::from_utf8(raw).map_err(|_| {
                        QuarryError::IllegalArgument("string field is not UTF-8".to_string())
                    })?;
                    fields.push(Field::Str(s));
                }
            }
        }
        Ok(Self {
            desc: desc.clone(),
            fields,
            record_id: None,
        })
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.desc == other.desc && self.fields == other.fields
    }
}

impl Eq for Tuple {}

impl std::fmt::Display for Tuple {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self.fields.iter().map(|v| v.to_string()).collect();
        write!(f, "({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_desc_size() {
        let desc = TupleDesc::new(vec![FieldType::Int, FieldType::Int]);
        assert_eq!(desc.size(), 8);

        let desc = TupleDesc::new(vec![FieldType::Int, FieldType::Str]);
        assert_eq!(desc.size(), 4 + 132);
    }

    #[test]
    fn test_int_fields_helper() {
        let desc = TupleDesc::int_fields(3);
        assert_eq!(desc.num_fields(), 3);
        assert_eq!(desc.size(), 12);
        assert_eq!(desc.field_type(2), FieldType::Int);
    }

    #[test]
    fn test_tuple_new_checks_descriptor() {
        let desc = TupleDesc::int_fields(2);
        assert!(Tuple::new(desc.clone(), vec![Field::Int(1), Field::Int(2)]).is_ok());
        assert!(Tuple::new(desc.clone(), vec![Field::Int(1)]).is_err());
        assert!(Tuple::new(desc, vec![Field::Int(1), Field::Str("x".into())]).is_err());
    }

    #[test]
    fn test_tuple_equality_ignores_record_id() {
        let mut a = Tuple::from_ints(&[1, 2]);
        let b = Tuple::from_ints(&[1, 2]);
        a.set_record_id(Some(RecordId::new(
            PageId::Heap(quarry_common::HeapPageId::new(1, 0)),
            3,
        )));
        assert_eq!(a, b);
        assert_ne!(a, Tuple::from_ints(&[1, 3]));
    }

    #[test]
    fn test_int_codec_roundtrip() {
        let t = Tuple::from_ints(&[42, -7, i32::MAX]);
        let mut buf = Vec::new();
        t.write_to(&mut buf);
        assert_eq!(buf.len(), t.desc().size());

        let decoded = Tuple::read_from(t.desc(), &mut buf.as_slice()).unwrap();
        assert_eq!(decoded, t);
    }

    #[test]
    fn test_string_codec_roundtrip() {
        let desc = TupleDesc::new(vec![FieldType::Str, FieldType::Int]);
        let t = Tuple::new(
            desc.clone(),
            vec![Field::Str("hello world".to_string()), Field::Int(9)],
        )
        .unwrap();

        let mut buf = Vec::new();
        t.write_to(&mut buf);
        assert_eq!(buf.len(), desc.size());

        // Length prefix then padded content.
        assert_eq!(u32::from_le_bytes(buf[0..4].try_into().unwrap()), 11);
        assert_eq!(&buf[4..15], b"hello world");
        assert!(buf[15..4 + STRING_LEN].iter().all(|&b| b == 0));

        let decoded = Tuple::read_from(&desc, &mut buf.as_slice()).unwrap();
        assert_eq!(decoded, t);
    }

    #[test]
    fn test_string_codec_truncates_overlong() {
        let desc = TupleDesc::new(vec![FieldType::Str]);
        let long = "x".repeat(STRING_LEN + 40);
        let t = Tuple::new(desc.clone(), vec![Field::Str(long)]).unwrap();

        let mut buf = Vec::new();
        t.write_to(&mut buf);
        assert_eq!(buf.len(), desc.size());

        let decoded = Tuple::read_from(&desc, &mut buf.as_slice()).unwrap();
        match decoded.field(0) {
            Field::Str(s) => assert_eq!(s.len(), STRING_LEN),
            _ => panic!("expected string field"),
        }
    }

    #[test]
    fn test_codec_short_read() {
        let desc = TupleDesc::int_fields(2);
        let buf = vec![0u8; 6];
        assert!(matches!(
            Tuple::read_from(&desc, &mut buf.as_slice()),
            Err(QuarryError::ShortRead { .. })
        ));
    }

    #[test]
    fn test_codec_corrupt_string_length() {
        let desc = TupleDesc::new(vec![FieldType::Str]);
        let mut buf = vec![0u8; desc.size()];
        buf[0..4].copy_from_slice(&(STRING_LEN as u32 + 1).to_le_bytes());
        assert!(matches!(
            Tuple::read_from(&desc, &mut buf.as_slice()),
            Err(QuarryError::IllegalArgument(_))
        ));
    }

    #[test]
    fn test_tuple_display() {
        let t = Tuple::from_ints(&[1, 2]);
        assert_eq!(t.to_string(), "(1, 2)");
    }
}
