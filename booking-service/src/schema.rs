diesel::table! {
    bookings (id) {
        id -> Uuid,
        tenant_id -> Varchar,
        table_id -> Int4,
        booking_date -> Date,
        start_time -> Varchar,
        end_time -> Varchar,
        start_minute -> Int4,
        end_minute -> Int4,
        payment_status -> Varchar,
        stripe_order_id -> Nullable<Varchar>,
        booking_ref -> Nullable<Varchar>,
        customer_email -> Nullable<Varchar>,
        customer_name -> Nullable<Varchar>,
        party_size -> Nullable<Int4>,
        total_amount -> Nullable<Int8>,
        is_manual -> Bool,
        receive_offers -> Bool,
        host_notes -> Nullable<Text>,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    holds (id) {
        id -> Uuid,
        table_id -> Int4,
        tenant_id -> Varchar,
        booking_ref -> Varchar,
        booking_date -> Date,
        start_time -> Varchar,
        end_time -> Varchar,
        start_minute -> Int4,
        end_minute -> Int4,
        expires_at -> Timestamptz,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    tenant_admin_keys (tenant_id) {
        tenant_id -> Varchar,
        key_digest -> Varchar,
        created_at -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    checkout_tracking (booking_ref) {
        booking_ref -> Varchar,
        tenant_id -> Varchar,
        session_created -> Bool,
        checkout_completed -> Bool,
        payment_succeeded -> Bool,
        updated_at -> Nullable<Timestamptz>,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    bookings,
    holds,
    tenant_admin_keys,
    checkout_tracking,
);
