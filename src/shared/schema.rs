diesel::table! {
    tickets (id) {
        id -> Uuid,
        code -> Varchar,
        protocol -> Varchar,
        subject -> Varchar,
        description -> Nullable<Text>,
        requester_email -> Varchar,
        requester_name -> Nullable<Varchar>,
        category -> Varchar,
        status -> SmallInt,
        priority -> Varchar,
        opened_at -> Timestamptz,
        closed_at -> Nullable<Timestamptz>,
        origin_ticket_id -> Nullable<Uuid>,
        reopen_count -> Int4,
        current_agent_id -> Nullable<Uuid>,
        transfer_count -> Int4,
        last_transfer_at -> Nullable<Timestamptz>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_reopenings (id) {
        id -> Uuid,
        original_ticket_id -> Uuid,
        reopened_ticket_id -> Uuid,
        initiated_by -> Uuid,
        reason -> Nullable<Text>,
        days_between -> Int4,
        status -> SmallInt,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_transfers (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        from_agent_id -> Nullable<Uuid>,
        to_agent_id -> Uuid,
        initiated_by -> Uuid,
        reason -> Nullable<Text>,
        notes -> Nullable<Text>,
        status_before -> SmallInt,
        status_after -> SmallInt,
        priority_before -> Varchar,
        priority_after -> Varchar,
        kind -> SmallInt,
        metadata -> Jsonb,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    support_agents (id) {
        id -> Uuid,
        user_id -> Uuid,
        display_name -> Varchar,
        email -> Varchar,
        active -> Bool,
        experience_level -> Varchar,
        specialties -> Array<Text>,
        max_open_tickets -> Int4,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    ticket_attachments (id) {
        id -> Uuid,
        ticket_id -> Uuid,
        original_name -> Varchar,
        stored_name -> Varchar,
        storage_path -> Varchar,
        size_bytes -> Int8,
        mime_type -> Varchar,
        extension -> Varchar,
        content_hash -> Nullable<Varchar>,
        uploaded_by -> Nullable<Uuid>,
        uploaded_at -> Nullable<Timestamptz>,
        description -> Nullable<Text>,
        active -> Bool,
        origin -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::joinable!(ticket_transfers -> tickets (ticket_id));
diesel::joinable!(ticket_attachments -> tickets (ticket_id));

diesel::allow_tables_to_appear_in_same_query!(
    tickets,
    ticket_reopenings,
    ticket_transfers,
    support_agents,
    ticket_attachments,
);
