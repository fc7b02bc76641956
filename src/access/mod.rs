use serde::{Deserialize, Serialize};

/// 访问级别，按权限从低到高排列
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    #[default]
    Public,
    Basic,
    Gallery,
    BlogAuthor,
    Admin,
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 5] = [
        AccessLevel::Public,
        AccessLevel::Basic,
        AccessLevel::Gallery,
        AccessLevel::BlogAuthor,
        AccessLevel::Admin,
    ];

    pub fn rank(self) -> u8 {
        match self {
            AccessLevel::Public => 0,
            AccessLevel::Basic => 1,
            AccessLevel::Gallery => 2,
            AccessLevel::BlogAuthor => 3,
            AccessLevel::Admin => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AccessLevel::Public => "public",
            AccessLevel::Basic => "basic",
            AccessLevel::Gallery => "gallery",
            AccessLevel::BlogAuthor => "blog_author",
            AccessLevel::Admin => "admin",
        }
    }

    /// 严格解析，未知标签返回 None
    pub fn parse(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == label)
    }

    /// 宽松解析，未知标签视为 public
    pub fn from_label(label: &str) -> Self {
        Self::parse(label).unwrap_or(AccessLevel::Public)
    }

    pub fn allows(self, required: AccessLevel) -> bool {
        self.rank() >= required.rank()
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compares two access labels by rank. Unknown labels rank as `public`.
pub fn has_access(user_level: &str, required_level: &str) -> bool {
    AccessLevel::from_label(user_level).allows(AccessLevel::from_label(required_level))
}
