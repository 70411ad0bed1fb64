table! {
    comments (id) {
        id -> Integer,
        post_id -> Integer,
        author_id -> Integer,
        text -> Text,
        created -> Timestamp,
    }
}

table! {
    follows (id) {
        id -> Integer,
        user_id -> Integer,
        author_id -> Integer,
    }
}

table! {
    groups (id) {
        id -> Integer,
        title -> Text,
        slug -> Text,
        description -> Text,
    }
}

table! {
    post_tags (id) {
        id -> Integer,
        post_id -> Integer,
        tag_id -> Integer,
    }
}

table! {
    posts (id) {
        id -> Integer,
        title -> Text,
        text -> Text,
        pub_date -> Timestamp,
        author_id -> Integer,
        group_id -> Nullable<Integer>,
        image -> Nullable<Text>,
    }
}

table! {
    tags (id) {
        id -> Integer,
        name -> Text,
        slug -> Text,
    }
}

table! {
    users (id) {
        id -> Integer,
        username -> Text,
        email -> Text,
        first_name -> Text,
        last_name -> Text,
        password_hash -> Text,
        date_joined -> Timestamp,
    }
}

joinable!(comments -> posts (post_id));
joinable!(comments -> users (author_id));
joinable!(post_tags -> posts (post_id));
joinable!(post_tags -> tags (tag_id));
joinable!(posts -> groups (group_id));
joinable!(posts -> users (author_id));

allow_tables_to_appear_in_same_query!(comments, follows, groups, post_tags, posts, tags, users,);
