//! Kernel-side envelope builders.

use cable_core::{
    Envelope, Header,
    envelope::{channel, kind},
};
use serde_json::{Value, json};

pub fn status(parent: &Header, state: &str) -> Envelope {
    Envelope::reply(
        parent,
        channel::IOPUB,
        kind::STATUS,
        json!({ "execution_state": state }),
    )
}

pub fn stream(parent: &Header, name: &str, text: &str) -> Envelope {
    Envelope::reply(
        parent,
        channel::IOPUB,
        kind::STREAM,
        json!({ "name": name, "text": text }),
    )
}

pub fn display(parent: &Header, data: Value) -> Envelope {
    Envelope::reply(
        parent,
        channel::IOPUB,
        kind::DISPLAY_DATA,
        json!({ "data": data, "metadata": {}, "transient": {} }),
    )
}

pub fn execute_ok(parent: &Header, execution_count: u32) -> Envelope {
    Envelope::reply(
        parent,
        channel::SHELL,
        kind::EXECUTE_REPLY,
        json!({
            "status": "ok",
            "execution_count": execution_count,
            "user_expressions": {},
            "payload": []
        }),
    )
}

pub fn execute_error(parent: &Header, execution_count: u32, ename: &str, evalue: &str) -> Envelope {
    Envelope::reply(
        parent,
        channel::SHELL,
        kind::EXECUTE_REPLY,
        json!({
            "status": "error",
            "execution_count": execution_count,
            "ename": ename,
            "evalue": evalue,
            "traceback": [
                "\u{1b}[0;31m---------------------------------------------------------------------------\u{1b}[0m",
                format!("\u{1b}[0;31m{ename}\u{1b}[0m: {evalue}"),
            ]
        }),
    )
}

/// Header of a request issued by some other client of the same kernel.
#[must_use]
pub fn foreign_parent(msg_id: &str) -> Header {
    Header {
        msg_id: msg_id.to_string(),
        msg_type: kind::EXECUTE_REQUEST.to_string(),
        ..Header::default()
    }
}
