/*! Integration tests for Mindoodb.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * - helpers: Shared entry-building helpers for the other modules
 * - sync: Tests for `SyncEngine` reconciliation across CAS backends
 * - network: Tests for the client/server network boundary and envelope codec
 * - loader: Tests for `DocumentLoader` replaying entries end to end
 */

mod helpers;
mod loader;
mod network;
mod sync;
