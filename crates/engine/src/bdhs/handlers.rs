// Heapscope - Heap Origin Tracer
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Framework click handler detection.
//!
//! A click captured by the DOM breakpoint pauses inside framework dispatch code. When the
//! clicked element carries a handler installed by a known framework, the run jumps straight to
//! it with a function-call breakpoint.

use tracing::debug;

use crate::{Debugger, Result, Transport};

/// A framework convention for storing click handlers on DOM elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameworkConvention {
    /// `el[__reactProps$<hash>].onClick`
    React,
    /// `el.__vnode.props.onClick`
    Vue3,
    /// `el.__vue__.$listeners.click`
    Vue2,
    /// `el.__x._x_on[i].value` where `type == "click"`
    Alpine,
}

impl FrameworkConvention {
    /// Detection order. The first convention yielding a handler wins.
    pub const PRIORITY: [Self; 4] = [Self::React, Self::Vue3, Self::Vue2, Self::Alpine];

    /// JavaScript statements returning the handler from `el` when present.
    pub fn probe(self) -> &'static str {
        match self {
            Self::React => {
                r#"{ const key = Object.getOwnPropertyNames(el).find(k => k.startsWith("__reactProps$")); if (key && el[key]?.onClick) return el[key].onClick; }"#
            }
            Self::Vue3 => r#"if (el.__vnode?.props?.onClick) return el.__vnode.props.onClick;"#,
            Self::Vue2 => r#"if (el.__vue__?.$listeners?.click) return el.__vue__.$listeners.click;"#,
            Self::Alpine => {
                r#"if (el.__x && el.__x.$data && Array.isArray(el.__x._x_on)) { for (const h of el.__x._x_on) { if (h.type === "click") return h.value; } }"#
            }
        }
    }
}

/// Function declaration run against the event target, probing every convention in order.
pub fn detection_function() -> String {
    let probes: Vec<&str> = FrameworkConvention::PRIORITY.iter().map(|c| c.probe()).collect();
    format!("function() {{ const el = this; {} return null; }}", probes.join(" "))
}

/// Resolves the framework click handler of the event being dispatched in `call_frame_id`.
///
/// Returns the handler's object id, or `None` when the event has no target object or no
/// convention matches.
pub async fn resolve_click_handler<T: Transport>(
    debugger: &Debugger<T>,
    call_frame_id: &str,
) -> Result<Option<String>> {
    let target = debugger.evaluate_on_call_frame(call_frame_id, "event.target").await?;
    let Some(target_id) = target.object_id else {
        return Ok(None);
    };
    debug!(%target_id, "Found click event target");

    let handler = debugger.call_function_on(&target_id, &detection_function(), false).await?;
    Ok(handler.object_id)
}
