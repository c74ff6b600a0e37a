// Visibility filter: decides whether a viewer may read a post.

use crate::db::models::{Post, Visibility};

/// Can `viewer` read `post`?
///
/// `viewer` is `None` for anonymous callers (including peer nodes reading
/// listings), which only ever see PUBLIC posts. `author_followers` holds the
/// ids of the authors following the post's author.
pub fn can_view(post: &Post, viewer: Option<&str>, author_followers: &[String]) -> bool {
    match post.visibility {
        Visibility::Public => true,
        Visibility::FriendsOnly => match viewer {
            Some(v) => v == post.author_id || author_followers.iter().any(|f| f == v),
            None => false,
        },
        Visibility::Private => match viewer {
            Some(v) => v == post.author_id || post.private_recipient_id.as_deref() == Some(v),
            None => false,
        },
    }
}
