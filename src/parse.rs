// Distributed under the OSI-approved BSD 2-Clause License.
// See accompanying LICENSE file for details.
