//! State shared by managers and checkers.

use warden_common::SubjectKind;

use crate::ctypes::ContentTypeResolver;
use crate::store::GrantTables;

pub(crate) struct Engine {
    pub resolver: ContentTypeResolver,
    pub users: GrantTables,
    pub groups: GrantTables,
    /// Rows per bulk insert statement.
    pub bulk_batch_size: usize,
}

impl Engine {
    pub const fn tables(&self, kind: SubjectKind) -> &GrantTables {
        match kind {
            SubjectKind::User => &self.users,
            SubjectKind::Group => &self.groups,
        }
    }
}
