//! Wire-protocol constants: operation opcodes and the XDM typeid table
//! (spec §4.2, §4.3, §6).

/// Opcodes for the operations that are prefixed by a request byte (those
/// that aren't bare command/login strings).
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    QueryCreate = 0x00,
    Close = 0x02,
    Bind = 0x03,
    Results = 0x04,
    Execute = 0x05,
    Info = 0x06,
    Options = 0x07,
    CreateDatabase = 0x08,
    Add = 0x09,
    /// Corrects the known `_PUTBINARY`/`_ADD` opcode collision in the
    /// original Python client (spec §9): BaseX's actual binary-put opcode.
    PutBinary = 0x0D,
    Put = 0x0C,
    Context = 0x0E,
    Updating = 0x1E,
    Full = 0x1F,
}

/// Status byte terminating a request/response exchange.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok = 0x00,
    Error = 0x01,
}

impl Status {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(Status::Ok),
            0x01 => Some(Status::Error),
            _ => None,
        }
    }
}

/// XDM type names keyed by the typeid byte streamed with each result item
/// (spec §4.3, §6). `None` entries are reserved/unused ids.
pub const XDM_TYPE_NAMES: [Option<&str>; 84] = [
    None, None, None, None, None, None, None,
    Some("function"), Some("node()"), Some("text()"),
    Some("processing-instruction()"), Some("element()"), Some("document-node()"),
    Some("document-node(element())"), Some("attribute()"), Some("comment()"),
    None, None, None, None, None, None, None, None, None, None, None, None, None, None, None,
    Some("item()"), Some("xs:untyped"), Some("xs:anyType"), Some("xs:anySimpleType"),
    Some("xs:anyAtomicType"), Some("xs:untypedAtomic"), Some("xs:string"),
    Some("xs:normalizedString"), Some("xs:token"), Some("xs:language"), Some("xs:NMTOKEN"),
    Some("xs:Name"), Some("xs:NCName"), Some("xs:ID"), Some("xs:IDREF"), Some("xs:ENTITY"),
    Some("xs:float"), Some("xs:double"), Some("xs:decimal"), Some("xs:precisionDecimal"),
    Some("xs:integer"), Some("xs:nonPositiveInteger"), Some("xs:negativeInteger"),
    Some("xs:long"), Some("xs:int"), Some("xs:short"), Some("xs:byte"),
    Some("xs:nonNegativeInteger"), Some("xs:unsignedLong"), Some("xs:unsignedInt"),
    Some("xs:unsignedShort"), Some("xs:unsignedByte"), Some("xs:positiveInteger"),
    Some("xs:duration"), Some("xs:yearMonthDuration"), Some("xs:dayTimeDuration"),
    Some("xs:dateTime"), Some("xs:dateTimeStamp"), Some("xs:date"), Some("xs:time"),
    Some("xs:gYearMonth"), Some("xs:gYear"), Some("xs:gMonthDay"), Some("xs:gDay"),
    Some("xs:gMonth"), Some("xs:boolean"), None, Some("basex:binary"), Some("xs:base64Binary"),
    Some("xs:hexBinary"), Some("xs:anyURI"), Some("xs:QName"), Some("xs:NOTATION"),
];

/// Typeids that, in the `full` stream, are preceded by an extra XDM metadata
/// string (document URI, attribute owner, or QName text) (spec §4.2, §6).
pub const FULL_STREAM_METADATA_TYPEIDS: [u8; 3] = [12, 14, 82];

/// Look up the XDM type name for a streamed typeid byte.
pub fn xdm_type_name(typeid: u8) -> Option<&'static str> {
    XDM_TYPE_NAMES.get(typeid as usize).copied().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typeid_table_matches_known_entries() {
        assert_eq!(xdm_type_name(8), Some("node()"));
        assert_eq!(xdm_type_name(11), Some("element()"));
        assert_eq!(xdm_type_name(55), Some("xs:int"));
        assert_eq!(xdm_type_name(76), Some("xs:boolean"));
        assert_eq!(xdm_type_name(83), Some("xs:NOTATION"));
        assert_eq!(xdm_type_name(0), None);
        assert_eq!(xdm_type_name(200), None);
    }

    #[test]
    fn full_stream_metadata_ids_match_spec() {
        assert_eq!(FULL_STREAM_METADATA_TYPEIDS, [12, 14, 82]);
    }
}
