/*
 * SPDX-FileCopyrightText: 2024 DIM Station Contributors
 *
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! End-to-end scenario tests exercising the full connection-handling
//! core against real duplex sockets, one test per testable property.

#[cfg(test)]
mod scenarios;
