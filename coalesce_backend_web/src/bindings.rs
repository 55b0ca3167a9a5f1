// Copyright 2026 the Coalesce Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Global browser functions.

use wasm_bindgen::prelude::*;

// Direct global bindings instead of `web_sys::Window` methods: no Window
// lookup per call, and they also resolve inside workers that expose them.
// `catch` turns a missing global into an arming failure instead of a trap.
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = performance, js_name = "now")]
    pub(crate) fn performance_now() -> f64;

    #[wasm_bindgen(catch, js_name = "requestAnimationFrame")]
    pub(crate) fn request_animation_frame(callback: &JsValue) -> Result<i32, JsValue>;

    #[wasm_bindgen(js_name = "cancelAnimationFrame")]
    pub(crate) fn cancel_animation_frame(id: i32);

    /// `setTimeout(handler, ms, key)`: the extra argument is passed back to
    /// the handler.
    #[wasm_bindgen(catch, js_name = "setTimeout")]
    pub(crate) fn set_timeout(handler: &JsValue, ms: f64, key: u32) -> Result<i32, JsValue>;

    #[wasm_bindgen(js_name = "clearTimeout")]
    pub(crate) fn clear_timeout(handle: i32);
}
