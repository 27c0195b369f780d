pub mod consts;
pub mod error;
pub mod crc;
pub mod codec;
pub mod block;
pub mod header;
pub mod params;
pub mod numbering;
pub mod recovery;
pub mod io_stream;
pub mod layout;
pub mod checksum;
pub mod reference;
pub mod archive;

pub use error::{Diagnostic, DiagnosticKind, RerarError, Result};
pub use params::{DataCrcScope, EndFlags, FormatVersion, VolumeParams};
pub use numbering::NamingScheme;
pub use layout::SetLayout;
pub use reference::{parse_reference, ReferenceReport};
pub use archive::{Release, ReleaseOptions, ReleaseSummary};
